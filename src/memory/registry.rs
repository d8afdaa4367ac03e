//! Per-session state, created lazily on first use.
//!
//! Sessions live for the lifetime of the registry; there is no eviction.

use super::cache::SessionMemoryCache;
use super::history::ChatHistoryManager;
use super::token_counter::TokenCounter;
use super::RetrievedMemory;
use crate::config::HistoryConfig;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Everything a turn handler needs for one session.
///
/// The history sits behind an async mutex so one conversation has at most one
/// in-flight turn; different sessions never contend.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Arc<str>,
    history: Arc<Mutex<ChatHistoryManager>>,
    cache: Arc<SessionMemoryCache>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &Arc<Mutex<ChatHistoryManager>> {
        &self.history
    }

    pub fn cache(&self) -> &Arc<SessionMemoryCache> {
        &self.cache
    }

    /// Push this turn's retrieval results, then read and decay the cache.
    ///
    /// Keeps the required order so fresh items are visible at full TTL.
    pub fn refresh_memories(&self, retrieved: Vec<RetrievedMemory>) -> Vec<Value> {
        self.cache.add_or_reactivate(&self.session_id, retrieved);
        self.cache.get_and_decay(&self.session_id)
    }

    /// True when both handles point at the same session state
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.history, &other.history)
    }
}

/// Owns one `ChatHistoryManager` per session id plus the shared cache
pub struct SessionRegistry {
    config: HistoryConfig,
    counter: Arc<dyn TokenCounter>,
    cache: Arc<SessionMemoryCache>,
    sessions: DashMap<String, Arc<Mutex<ChatHistoryManager>>>,
}

impl SessionRegistry {
    pub fn new(
        config: HistoryConfig,
        counter: Arc<dyn TokenCounter>,
        cache: Arc<SessionMemoryCache>,
    ) -> Self {
        Self {
            config,
            counter,
            cache,
            sessions: DashMap::new(),
        }
    }

    /// Return the session's state, constructing it on first use.
    ///
    /// The map entry is locked while constructing, so concurrent first
    /// access from the same id yields a single instance.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let history = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!("Creating session state for {}", session_id);
                Arc::new(Mutex::new(ChatHistoryManager::new(
                    self.config.clone(),
                    self.counter.clone(),
                )))
            })
            .clone();

        SessionHandle {
            session_id: Arc::from(session_id),
            history,
            cache: self.cache.clone(),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn cache(&self) -> &Arc<SessionMemoryCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TurnRole;
    use serde_json::json;

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            HistoryConfig::default(),
            Arc::new(CharCounter),
            Arc::new(SessionMemoryCache::new(2)),
        )
    }

    #[tokio::test]
    async fn test_same_id_same_state() {
        let registry = registry();
        let first = registry.get_or_create("alice");
        first.history().lock().await.add([(TurnRole::User, "hello")]);

        let second = registry.get_or_create("alice");
        assert!(first.same_session(&second));
        assert_eq!(second.history().lock().await.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_different_ids_independent() {
        let registry = registry();
        let alice = registry.get_or_create("alice");
        let bob = registry.get_or_create("bob");
        alice.history().lock().await.add([(TurnRole::User, "hi")]);

        assert!(!alice.same_session(&bob));
        assert!(bob.history().lock().await.is_empty());
        let mut ids = registry.session_ids();
        ids.sort();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_single_instance() {
        let registry = Arc::new(registry());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.get_or_create("racy") }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert!(handles.iter().all(|h| h.same_session(&handles[0])));
    }

    #[test]
    fn test_refresh_memories_orders_add_before_decay() {
        let registry = registry();
        let session = registry.get_or_create("s");

        let first = session.refresh_memories(vec![RetrievedMemory::new("m1", json!("x"))]);
        assert_eq!(first, vec![json!("x")]);
        let second = session.refresh_memories(Vec::new());
        assert_eq!(second, vec![json!("x")]);
        assert!(session.refresh_memories(Vec::new()).is_empty());
    }
}
