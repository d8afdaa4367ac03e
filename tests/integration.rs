//! Integration tests for the memory engine

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mira_memory::consolidation::RecordKind;
use mira_memory::{
    BufferKind, ChatHistoryManager, DurableStore, HeuristicConsolidator, HistoryConfig,
    MemoryConfig, MemoryEngine, MemoryError, RetrievedMemory, Retriever, SchedulerState,
    TokenCounter, TurnRole,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// Every text costs the same number of tokens
struct FlatCounter(usize);

impl TokenCounter for FlatCounter {
    fn count(&self, _text: &str) -> usize {
        self.0
    }
}

async fn engine_in(temp_dir: &TempDir, ttl: u32) -> MemoryEngine {
    let config = MemoryConfig::default()
        .with_store_dir(temp_dir.path().join("store"))
        .with_default_ttl_turns(ttl);
    MemoryEngine::new(config, Arc::new(HeuristicConsolidator::new()))
        .await
        .unwrap()
}

/// A full turn records both sides in the window and the dialogue log
#[tokio::test]
async fn test_turn_flow_records_history_and_dialogue() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 5).await;

    let session = engine.begin_turn("alice");
    let context = engine
        .prepare_turn(
            &session,
            "hello there",
            vec![RetrievedMemory::new("fact_1", json!({"content": "likes tea"}))],
        )
        .await;
    assert_eq!(context.memories, vec![json!({"content": "likes tea"})]);
    assert_eq!(context.history.len(), 1);
    assert!(context.history[0].starts_with("hello there ["));

    engine
        .finish_turn(&session, "hello there", "hi, how was your day?")
        .await
        .unwrap();

    let dialogues = engine.store().recent_dialogues(5).await.unwrap();
    assert_eq!(dialogues.len(), 1);
    assert_eq!(dialogues[0]["user"], "hello there");
    assert_eq!(dialogues[0]["agent"], "hi, how was your day?");

    let again = engine.begin_turn("alice");
    assert!(again.same_session(&session));
    let context = engine.prepare_turn(&again, "fine", Vec::new()).await;
    assert_eq!(context.history.len(), 3);
    assert!(context.history[1].starts_with("hi, how was your day? ["));
}

/// Sessions do not share windows or cached memories
#[tokio::test]
async fn test_sessions_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 5).await;

    let alice = engine.begin_turn("alice");
    let bob = engine.begin_turn("bob");
    engine
        .prepare_turn(
            &alice,
            "remember my cat",
            vec![RetrievedMemory::new("fact_cat", json!({"content": "has a cat"}))],
        )
        .await;

    let context = engine.prepare_turn(&bob, "hi", Vec::new()).await;
    assert!(context.memories.is_empty());
    assert_eq!(context.history.len(), 1);
    assert_eq!(engine.registry().len(), 2);
}

/// A retrieved memory stays visible for its TTL and a re-hit restores it
#[tokio::test]
async fn test_memory_ttl_across_turns() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 2).await;
    let session = engine.begin_turn("s");
    let hit = || vec![RetrievedMemory::new("m1", json!({"content": "exam friday"}))];

    assert_eq!(engine.prepare_turn(&session, "t1", hit()).await.memories.len(), 1);
    assert_eq!(engine.prepare_turn(&session, "t2", Vec::new()).await.memories.len(), 1);
    assert!(engine.prepare_turn(&session, "t3", Vec::new()).await.memories.is_empty());

    assert_eq!(engine.prepare_turn(&session, "t4", hit()).await.memories.len(), 1);
    assert_eq!(session.cache().ttl_of("s", "m1"), Some(1));
}

/// Search backend that is always down
struct UnreachableRetriever;

#[async_trait]
impl Retriever for UnreachableRetriever {
    async fn search(&self, _query: &str) -> mira_memory::Result<Vec<RetrievedMemory>> {
        Err(MemoryError::Retriever("connection refused".to_string()))
    }
}

/// A failed search still serves cached memories and the window
#[tokio::test]
async fn test_retrieval_failure_keeps_cache_and_history() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 3).await;
    let session = engine.begin_turn("s");
    engine
        .prepare_turn(
            &session,
            "my exam is friday",
            vec![RetrievedMemory::new("m1", json!({"content": "exam friday"}))],
        )
        .await;

    let context = engine
        .prepare_turn_with(&session, "any advice?", &UnreachableRetriever)
        .await;

    assert_eq!(context.memories, vec![json!({"content": "exam friday"})]);
    assert_eq!(context.history.len(), 2);
    assert!(context.history[1].starts_with("any advice? ["));
    assert_eq!(session.cache().ttl_of("s", "m1"), Some(1));
}

/// Buffered items reach the store and become searchable
#[tokio::test]
async fn test_consolidation_persists_and_retrieves() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 5).await;

    engine.buffer(BufferKind::Fact, json!({"content": "Drinks green tea daily"}));
    engine.buffer(BufferKind::Fact, json!({"content": "drinks green  tea daily"}));
    engine.buffer(BufferKind::Fact, json!({"content": "Works as a nurse"}));
    engine.buffer(BufferKind::Preference, json!({"content": "Prefers short answers"}));
    engine.buffer(
        BufferKind::ProfileUpdate,
        json!({"profile_data": {"name": "Ana", "city": "Porto"}}),
    );

    let report = engine.consolidate_now().await;
    assert!(report.is_clean());
    assert_eq!(report.outcome(BufferKind::Fact).map(|o| o.persisted), Some(2));
    assert!(engine.buffers().is_empty());

    let facts = engine.store().load_all(RecordKind::Fact).await.unwrap();
    assert_eq!(facts.len(), 2);
    assert!(facts.iter().all(|f| f["id"].as_str().is_some_and(|id| id.starts_with("fact_"))));

    let profile = engine.store().load_profile().await.unwrap();
    assert_eq!(profile["name"], "Ana");
    assert_eq!(profile["city"], "Porto");

    let session = engine.begin_turn("ana");
    let context = engine
        .prepare_turn_with(&session, "any tea today?", engine.store().as_ref())
        .await;
    assert_eq!(context.memories.len(), 1);
    assert_eq!(context.memories[0]["content"], "drinks green  tea daily");
}

/// The idle watcher only fires past the threshold, then rearms
#[tokio::test]
async fn test_idle_tick_consolidates_then_resets_baseline() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 5).await;
    engine.buffer(BufferKind::Preference, json!({"content": "likes jazz"}));

    let now = Utc::now();
    engine.activity().touch_at(now - Duration::minutes(5));
    assert!(engine.scheduler().tick_at(now).await.is_none());
    assert_eq!(engine.buffers().len(BufferKind::Preference), 1);

    engine.activity().touch_at(now - Duration::minutes(30));
    let report = engine.scheduler().tick_at(now).await.unwrap();
    assert!(report.is_clean());
    assert!(engine.buffers().is_empty());
    assert!(engine.activity().last_interaction() > now - Duration::seconds(1));
    assert_eq!(engine.scheduler().state(), SchedulerState::IdleWatch);

    assert!(engine.scheduler().tick_at(now).await.is_none());
}

/// The spawned watcher stops cleanly on shutdown
#[tokio::test]
async fn test_scheduler_start_and_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_in(&temp_dir, 5).await;

    let handle = engine.start_scheduler();
    assert!(!handle.is_finished());
    handle.shutdown().await;
}

/// Oversized history trims oldest turns down to the budget
#[test]
fn test_token_budget_trims_oldest() {
    let config = HistoryConfig {
        max_token_limit: 20_000,
        min_turns_to_keep: 5,
        ..HistoryConfig::default()
    };
    let mut history = ChatHistoryManager::new(config, Arc::new(FlatCounter(1000)));
    history.add((0..25).map(|i| (TurnRole::User, format!("turn {}", i))));

    let messages = history.messages();
    assert_eq!(messages.len(), 20);
    assert_eq!(history.total_token_count(), 20_000);
    assert!(messages[0].starts_with("turn 5 ["));
}

/// Old turns survive only while they belong to a continuous exchange
#[test]
fn test_retention_keeps_continuous_old_exchange() {
    let config = HistoryConfig {
        min_turns_to_keep: 1,
        ..HistoryConfig::default()
    };
    let mut history = ChatHistoryManager::new(config, Arc::new(FlatCounter(1)));
    let now = Utc::now();
    let base = now - Duration::hours(3);
    history.push_at(TurnRole::User, "old question", base);
    history.push_at(TurnRole::Agent, "old answer", base + Duration::seconds(60));
    history.push_at(TurnRole::User, "stray remark", now - Duration::hours(2));
    history.push_at(TurnRole::User, "recent question", now - Duration::minutes(10));
    history.push_at(TurnRole::Agent, "recent answer", now - Duration::minutes(9));

    let texts: Vec<String> = history
        .messages_at(now)
        .into_iter()
        .map(|m| m.split(" [").next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        texts,
        vec!["old question", "old answer", "recent question", "recent answer"]
    );
    assert_eq!(history.total_token_count(), 4);
}

/// Config files may be partial; missing files give defaults
#[test]
fn test_config_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mira.toml");

    let defaults = MemoryConfig::load(&path).unwrap();
    assert_eq!(defaults.history.max_token_limit, 100_000);

    std::fs::write(
        &path,
        "[history]\nmax_token_limit = 4000\n\n[idle]\nidle_threshold_seconds = 90\n",
    )
    .unwrap();
    let config = MemoryConfig::load(&path).unwrap();
    assert_eq!(config.history.max_token_limit, 4000);
    assert_eq!(config.history.retention_seconds, 1800);
    assert_eq!(config.idle.idle_threshold_seconds, 90);
    assert_eq!(config.cache.default_ttl_turns, 5);

    std::fs::write(&path, "[cache]\ndefault_ttl_turns = 0\n").unwrap();
    assert!(MemoryConfig::load(&path).is_err());
}
