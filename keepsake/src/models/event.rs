//! Change-feed wire shapes.

use serde::{Deserialize, Serialize};

use super::Memory;

/// One collection change as pushed by the backend.
///
/// The feed carries exactly three shapes: `{eventType: "insert", new: ..}`,
/// `{eventType: "update", new: ..}` and `{eventType: "delete", old: {id}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert { new: Memory },
    Update { new: Memory },
    Delete { old: DeletedRecord },
}

impl ChangeEvent {
    pub fn memory_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new } => &new.id,
            ChangeEvent::Delete { old } => &old.id,
        }
    }
}

/// Tombstone payload of a delete event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub id: String,
}

/// Feed envelope: the event plus an optional per-record ordering token.
///
/// `seq` lets the store discard stale out-of-order events; feeds without one
/// fall back to last-received-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub event: ChangeEvent,
}

impl FeedMessage {
    pub fn insert(record: Memory) -> Self {
        Self {
            seq: None,
            event: ChangeEvent::Insert { new: record },
        }
    }

    pub fn update(record: Memory) -> Self {
        Self {
            seq: None,
            event: ChangeEvent::Update { new: record },
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            seq: None,
            event: ChangeEvent::Delete {
                old: DeletedRecord { id: id.into() },
            },
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}
