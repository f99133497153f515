//! Fire-and-forget timeline emission.

use crate::models::{BasketId, PipelineEvent, TimelineEventKind, WorkspaceId};
use crate::observability::{EventBus, global_event_bus};
use crate::storage::SubstrateStore;
use std::sync::Arc;

/// Persists timeline events and publishes them on the event bus.
///
/// Emission never fails the caller: storage errors are logged and counted.
#[derive(Clone)]
pub struct TimelineEmitter {
    store: Arc<dyn SubstrateStore>,
    bus: EventBus,
    source: &'static str,
}

impl TimelineEmitter {
    /// Creates an emitter publishing to the global event bus.
    #[must_use]
    pub fn new(store: Arc<dyn SubstrateStore>, source: &'static str) -> Self {
        Self::with_bus(store, global_event_bus().clone(), source)
    }

    /// Creates an emitter publishing to `bus`.
    #[must_use]
    pub fn with_bus(store: Arc<dyn SubstrateStore>, bus: EventBus, source: &'static str) -> Self {
        Self { store, bus, source }
    }

    /// Emits an event for `basket_id`.
    pub fn emit(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        kind: TimelineEventKind,
        actor_id: Option<&str>,
    ) {
        let mut event = PipelineEvent::new(self.source, basket_id.clone(), workspace_id.clone(), kind);
        if let Some(actor) = actor_id {
            event = event.with_actor(actor);
        }
        let event_type = event.event_type();

        if let Err(e) = self.store.append_event(&event) {
            metrics::counter!("timeline_emit_failures_total", "event_type" => event_type)
                .increment(1);
            tracing::warn!(
                event_type = event_type,
                basket_id = %basket_id,
                error = %e,
                "Failed to persist timeline event"
            );
        }
        self.bus.publish(event);
        metrics::counter!("timeline_events_total", "event_type" => event_type).increment(1);
    }
}

impl std::fmt::Debug for TimelineEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineEmitter")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DumpId;
    use crate::storage::{InMemoryStore, TimelineBackend};

    #[test]
    fn test_emit_persists_and_publishes() {
        let store = Arc::new(InMemoryStore::new());
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();
        let emitter = TimelineEmitter::with_bus(store.clone(), bus, "test");

        emitter.emit(
            &BasketId::new("b1"),
            &WorkspaceId::new("w1"),
            TimelineEventKind::DumpCreated {
                dump_id: DumpId::new("d1"),
            },
            Some("agent"),
        );

        let events = store.list_events(&BasketId::new("b1"), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "dump.created");
        assert_eq!(events[0].actor_id.as_deref(), Some("agent"));
        assert_eq!(receiver.try_recv().unwrap().event_type(), "dump.created");
    }
}
