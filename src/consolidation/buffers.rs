//! Ephemeral extraction buffers.
//!
//! Turn handlers append newly extracted facts, preferences and profile
//! updates; the idle scheduler snapshots a buffer, consolidates it, and then
//! removes exactly the snapshotted items. Items appended while a pass is in
//! flight are therefore kept for the next pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Category of buffered item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Fact,
    Preference,
    ProfileUpdate,
}

impl BufferKind {
    pub const ALL: [BufferKind; 3] = [Self::Fact, Self::Preference, Self::ProfileUpdate];

    fn index(self) -> usize {
        match self {
            Self::Fact => 0,
            Self::Preference => 1,
            Self::ProfileUpdate => 2,
        }
    }
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fact => write!(f, "fact"),
            Self::Preference => write!(f, "preference"),
            Self::ProfileUpdate => write!(f, "profile_update"),
        }
    }
}

/// An extracted item waiting for consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedItem {
    pub id: Uuid,
    pub kind: BufferKind,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
}

impl BufferedItem {
    pub fn new(kind: BufferKind, content: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Item counts per buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    pub facts: usize,
    pub preferences: usize,
    pub profile_updates: usize,
}

impl BufferStatus {
    pub fn total(&self) -> usize {
        self.facts + self.preferences + self.profile_updates
    }
}

/// One append-only buffer per `BufferKind`
#[derive(Debug, Default)]
pub struct EphemeralBuffers {
    buffers: [Mutex<Vec<BufferedItem>>; 3],
}

impl EphemeralBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, kind: BufferKind) -> MutexGuard<'_, Vec<BufferedItem>> {
        // A poisoned buffer still holds valid items
        self.buffers[kind.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a new item and return its id
    pub fn push(&self, kind: BufferKind, content: Value) -> Uuid {
        self.push_item(BufferedItem::new(kind, content))
    }

    pub fn push_item(&self, item: BufferedItem) -> Uuid {
        let id = item.id;
        self.buffer(item.kind).push(item);
        id
    }

    /// Copy of the buffer's current contents
    pub fn snapshot(&self, kind: BufferKind) -> Vec<BufferedItem> {
        self.buffer(kind).clone()
    }

    /// Remove the given items, keeping anything appended since the snapshot
    pub fn remove(&self, kind: BufferKind, ids: &HashSet<Uuid>) -> usize {
        let mut buffer = self.buffer(kind);
        let before = buffer.len();
        buffer.retain(|item| !ids.contains(&item.id));
        before - buffer.len()
    }

    pub fn len(&self, kind: BufferKind) -> usize {
        self.buffer(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        BufferKind::ALL.iter().all(|&kind| self.len(kind) == 0)
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            facts: self.len(BufferKind::Fact),
            preferences: self.len(BufferKind::Preference),
            profile_updates: self.len(BufferKind::ProfileUpdate),
        }
    }

    pub fn clear_all(&self) {
        for kind in BufferKind::ALL {
            self.buffer(kind).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_and_status() {
        let buffers = EphemeralBuffers::new();
        assert!(buffers.is_empty());

        buffers.push(BufferKind::Fact, json!({"content": "has a cat"}));
        buffers.push(BufferKind::Fact, json!({"content": "lives in Lyon"}));
        buffers.push(BufferKind::ProfileUpdate, json!({"age": 30}));

        let status = buffers.status();
        assert_eq!(status.facts, 2);
        assert_eq!(status.preferences, 0);
        assert_eq!(status.profile_updates, 1);
        assert_eq!(status.total(), 3);
        assert!(!buffers.is_empty());
    }

    #[test]
    fn test_remove_keeps_items_added_after_snapshot() {
        let buffers = EphemeralBuffers::new();
        buffers.push(BufferKind::Preference, json!({"content": "likes jazz"}));
        let snapshot = buffers.snapshot(BufferKind::Preference);

        let late = buffers.push(BufferKind::Preference, json!({"content": "likes tea"}));

        let ids: HashSet<Uuid> = snapshot.iter().map(|i| i.id).collect();
        assert_eq!(buffers.remove(BufferKind::Preference, &ids), 1);

        let remaining = buffers.snapshot(BufferKind::Preference);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, late);
    }

    #[test]
    fn test_buffers_are_independent() {
        let buffers = EphemeralBuffers::new();
        buffers.push(BufferKind::Fact, json!("a"));
        buffers.push(BufferKind::Preference, json!("b"));

        let ids: HashSet<Uuid> = buffers
            .snapshot(BufferKind::Fact)
            .iter()
            .map(|i| i.id)
            .collect();
        buffers.remove(BufferKind::Fact, &ids);

        assert_eq!(buffers.len(BufferKind::Fact), 0);
        assert_eq!(buffers.len(BufferKind::Preference), 1);
    }

    #[test]
    fn test_clear_all() {
        let buffers = EphemeralBuffers::new();
        for kind in BufferKind::ALL {
            buffers.push(kind, json!("x"));
        }
        buffers.clear_all();
        assert!(buffers.is_empty());
    }
}
