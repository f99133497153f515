//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an existing string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh time-ordered identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    /// Identifier of a raw dump.
    DumpId
);
define_id!(
    /// Identifier of a basket (top-level container within a workspace).
    BasketId
);
define_id!(
    /// Identifier of a workspace (tenant boundary).
    WorkspaceId
);
define_id!(
    /// Identifier of a substrate unit (block or context item).
    SubstrateId
);
define_id!(
    /// Identifier of a governance proposal.
    ProposalId
);
define_id!(
    /// Identifier of a stored relationship.
    RelationshipId
);
define_id!(
    /// Identifier of a reflection artifact.
    ReflectionId
);
define_id!(
    /// Identifier of a composed document.
    DocumentId
);
define_id!(
    /// Identifier of a queue entry.
    QueueEntryId
);
define_id!(
    /// Identifier of a higher-level unit of work spanning several queue entries.
    WorkId
);
