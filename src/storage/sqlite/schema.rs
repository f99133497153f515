//! `SQLite` schema for the substrate store.
//!
//! Nested structures (provenance, operations, metadata) are stored as JSON
//! text; everything filtered or ordered on is a real column.

/// Table definitions.
pub const TABLES: &str = "
CREATE TABLE IF NOT EXISTS raw_dumps (
    id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    body TEXT NOT NULL,
    file_url TEXT,
    source_meta TEXT NOT NULL DEFAULT '{}',
    batch_id TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dump_tombstones (
    dump_id TEXT PRIMARY KEY REFERENCES raw_dumps(id),
    reason TEXT NOT NULL,
    tombstoned_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS substrate_units (
    id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    semantic_type TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    confidence REAL NOT NULL,
    state TEXT NOT NULL,
    anchor_role TEXT,
    provenance TEXT NOT NULL DEFAULT '{}',
    synonyms TEXT NOT NULL DEFAULT '[]',
    canonical_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS proposals (
    id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    origin TEXT NOT NULL,
    provenance TEXT NOT NULL DEFAULT '[]',
    ops TEXT NOT NULL,
    validator_report TEXT NOT NULL,
    status TEXT NOT NULL,
    is_executed INTEGER NOT NULL DEFAULT 0,
    execution_log TEXT NOT NULL DEFAULT '[]',
    review_notes TEXT,
    reviewed_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    executed_at INTEGER
);

CREATE TABLE IF NOT EXISTS workspace_policies (
    workspace_id TEXT PRIMARY KEY,
    governance_enabled INTEGER NOT NULL,
    validator_required INTEGER NOT NULL,
    ep_manual_edit TEXT NOT NULL,
    ep_graph_action TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS substrate_relationships (
    id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    from_kind TEXT NOT NULL,
    from_id TEXT NOT NULL,
    relationship_type TEXT NOT NULL,
    to_kind TEXT NOT NULL,
    to_id TEXT NOT NULL,
    strength REAL NOT NULL,
    description TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (basket_id, from_kind, from_id, relationship_type, to_kind, to_id)
);

CREATE TABLE IF NOT EXISTS reflection_artifacts (
    id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    reflection_text TEXT NOT NULL,
    reflection_target_type TEXT NOT NULL,
    substrate_window_start INTEGER NOT NULL,
    substrate_window_end INTEGER NOT NULL,
    substrate_hash TEXT NOT NULL,
    entries TEXT NOT NULL DEFAULT '[]',
    used_fallback INTEGER NOT NULL DEFAULT 0,
    computed_at INTEGER NOT NULL,
    UNIQUE (basket_id, substrate_hash)
);

CREATE TABLE IF NOT EXISTS basket_signatures (
    basket_id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    current_version INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS document_versions (
    document_id TEXT NOT NULL REFERENCES documents(id),
    version_no INTEGER NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (document_id, version_no)
);

CREATE TABLE IF NOT EXISTS substrate_references (
    document_id TEXT NOT NULL REFERENCES documents(id),
    substrate_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    semantic_type TEXT NOT NULL,
    rank INTEGER NOT NULL,
    score REAL NOT NULL,
    PRIMARY KEY (document_id, substrate_id)
);

CREATE TABLE IF NOT EXISTS timeline_events (
    event_id TEXT PRIMARY KEY,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor_id TEXT,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS work_queue (
    id TEXT PRIMARY KEY,
    work_type TEXT NOT NULL,
    work TEXT NOT NULL,
    basket_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    worker_id TEXT,
    claimed_at INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0,
    error_details TEXT,
    work_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Index definitions. Failures are non-fatal.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_raw_dumps_basket ON raw_dumps(basket_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_raw_dumps_batch ON raw_dumps(basket_id, batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_substrate_basket ON substrate_units(basket_id, state)",
    "CREATE INDEX IF NOT EXISTS idx_proposals_basket ON proposals(basket_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_relationships_basket ON substrate_relationships(basket_id)",
    "CREATE INDEX IF NOT EXISTS idx_reflections_basket ON reflection_artifacts(basket_id, computed_at)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_basket ON timeline_events(basket_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_claim ON work_queue(status, priority DESC, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_basket ON work_queue(basket_id, work_type, status)",
];
