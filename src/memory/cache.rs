//! Turn-decaying cache of retrieved memories, namespaced by session.
//!
//! Workflow per turn: `add_or_reactivate` the freshly retrieved items, then
//! `get_and_decay` to read everything still alive. An item inserted with a
//! TTL of N is returned by exactly N consecutive `get_and_decay` calls unless
//! it is reactivated, which resets the countdown to the full default.

use super::RetrievedMemory;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// One cached memory. `ttl_turns` is always at least 1 while stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryCacheEntry {
    pub memory_id: String,
    pub payload: Value,
    pub ttl_turns: u32,
}

/// Session-scoped retrieved-memory cache
#[derive(Debug)]
pub struct SessionMemoryCache {
    default_ttl_turns: u32,
    /// session_id -> memory_id -> entry
    sessions: DashMap<String, HashMap<String, MemoryCacheEntry>>,
}

impl SessionMemoryCache {
    pub fn new(default_ttl_turns: u32) -> Self {
        Self {
            default_ttl_turns: default_ttl_turns.max(1),
            sessions: DashMap::new(),
        }
    }

    pub fn default_ttl_turns(&self) -> u32 {
        self.default_ttl_turns
    }

    /// Insert new items or reset existing ones to the full default TTL.
    /// Items without an identifier are ignored.
    pub fn add_or_reactivate(&self, session_id: &str, items: Vec<RetrievedMemory>) {
        if items.is_empty() {
            return;
        }

        let mut session = self.sessions.entry(session_id.to_string()).or_default();
        let mut accepted = 0usize;
        for item in items {
            let Some(memory_id) = item.id.filter(|id| !id.is_empty()) else {
                continue;
            };
            session.insert(
                memory_id.clone(),
                MemoryCacheEntry {
                    memory_id,
                    payload: item.payload,
                    ttl_turns: self.default_ttl_turns,
                },
            );
            accepted += 1;
        }

        debug!(
            "Memory cache [{}]: added/reactivated {} items",
            short_id(session_id),
            accepted
        );
    }

    /// Return every live payload, then age all entries by one turn and drop
    /// the ones that reach zero.
    pub fn get_and_decay(&self, session_id: &str) -> Vec<Value> {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Vec::new();
        };

        let mut active = Vec::with_capacity(session.len());
        let mut survivors = HashMap::with_capacity(session.len());
        for (memory_id, mut entry) in session.drain() {
            debug_assert!(entry.ttl_turns > 0, "cache stored an expired entry");
            active.push(entry.payload.clone());
            entry.ttl_turns -= 1;
            if entry.ttl_turns > 0 {
                survivors.insert(memory_id, entry);
            }
        }
        *session = survivors;

        debug!(
            "Memory cache [{}]: returned {} items, {} remain",
            short_id(session_id),
            active.len(),
            session.len()
        );
        active
    }

    /// Number of entries currently stored for a session
    pub fn session_len(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, |s| s.len())
    }

    /// Remaining TTL of a stored entry
    pub fn ttl_of(&self, session_id: &str, memory_id: &str) -> Option<u32> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.get(memory_id).map(|e| e.ttl_turns))
    }

    /// Forget everything cached for a session
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

fn short_id(session_id: &str) -> &str {
    let end = session_id
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(session_id.len());
    &session_id[..end]
}
