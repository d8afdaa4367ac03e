//! Conversation-side memory state
//!
//! Provides the per-session dialogue window, the turn-decaying cache of
//! retrieved memories, and the registry that owns both per session.

mod cache;
mod history;
mod natural_time;
mod registry;
mod token_counter;

pub use cache::{MemoryCacheEntry, SessionMemoryCache};
pub use history::{ChatHistoryManager, DialogueTurn, TurnRole};
pub use natural_time::format_natural_time;
pub use registry::{SessionHandle, SessionRegistry};
pub use token_counter::{TiktokenCounter, TokenCounter, FALLBACK_ENCODING};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A long-term memory returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMemory {
    /// Items without an id cannot be cached
    pub id: Option<String>,
    pub payload: Value,
}

impl RetrievedMemory {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            payload,
        }
    }

    /// Build from a search hit shaped like `{"id": ..., ...}`; the whole
    /// object becomes the payload.
    pub fn from_hit(hit: Value) -> Self {
        let id = hit.get("id").and_then(|v| v.as_str()).map(str::to_string);
        Self { id, payload: hit }
    }
}

/// Similarity search over durable memories
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedMemory>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_hit_extracts_id() {
        let hit = json!({"id": "fact_1", "content": "likes tea"});
        let memory = RetrievedMemory::from_hit(hit.clone());
        assert_eq!(memory.id.as_deref(), Some("fact_1"));
        assert_eq!(memory.payload, hit);
    }

    #[test]
    fn test_from_hit_without_id() {
        let memory = RetrievedMemory::from_hit(json!({"content": "no id"}));
        assert!(memory.id.is_none());
    }
}
