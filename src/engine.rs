//! Wiring for a running agent: session registry, retrieved-memory cache,
//! extraction buffers, activity clock, durable store and idle scheduler.

use crate::config::MemoryConfig;
use crate::consolidation::{
    ActivityClock, BufferKind, Consolidator, EphemeralBuffers, FileStore,
    IdleConsolidationScheduler, PassReport, SchedulerHandle,
};
use crate::memory::{
    RetrievedMemory, Retriever, SessionHandle, SessionMemoryCache, SessionRegistry,
    TiktokenCounter, TurnRole,
};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Memory context assembled for one turn's prompt.
///
/// `history` already ends with the current user input, so a prompt can be
/// built from it alone without passing the input separately.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    /// Live retrieved memories after this turn's decay
    pub memories: Vec<Value>,
    /// Annotated dialogue window, oldest first
    pub history: Vec<String>,
}

pub struct MemoryEngine {
    config: MemoryConfig,
    registry: SessionRegistry,
    buffers: Arc<EphemeralBuffers>,
    activity: Arc<ActivityClock>,
    store: Arc<FileStore>,
    scheduler: Arc<IdleConsolidationScheduler>,
}

impl MemoryEngine {
    /// Build the engine and open the durable store under `config.store_dir`
    pub async fn new(config: MemoryConfig, consolidator: Arc<dyn Consolidator>) -> Result<Self> {
        let counter = Arc::new(TiktokenCounter::for_model(&config.history.model));
        let cache = Arc::new(SessionMemoryCache::new(config.cache.default_ttl_turns));
        let registry = SessionRegistry::new(config.history.clone(), counter, cache);

        let buffers = Arc::new(EphemeralBuffers::new());
        let activity = Arc::new(ActivityClock::new());
        let store = Arc::new(FileStore::new(&config.store_dir).await?);
        let scheduler = Arc::new(IdleConsolidationScheduler::new(
            config.idle.clone(),
            activity.clone(),
            buffers.clone(),
            consolidator,
            store.clone(),
        ));

        Ok(Self {
            config,
            registry,
            buffers,
            activity,
            store,
            scheduler,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn buffers(&self) -> &Arc<EphemeralBuffers> {
        &self.buffers
    }

    pub fn activity(&self) -> &Arc<ActivityClock> {
        &self.activity
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<IdleConsolidationScheduler> {
        &self.scheduler
    }

    /// Start the background idle watcher
    pub fn start_scheduler(&self) -> SchedulerHandle {
        info!("Starting idle consolidation");
        self.scheduler.clone().spawn()
    }

    /// Mark an interaction and return the session's state
    pub fn begin_turn(&self, session_id: &str) -> SessionHandle {
        self.activity.touch();
        self.registry.get_or_create(session_id)
    }

    /// Record a user message, refresh the memory cache with `retrieved`, and
    /// return what the next prompt should contain.
    pub async fn prepare_turn(
        &self,
        session: &SessionHandle,
        user_input: &str,
        retrieved: Vec<RetrievedMemory>,
    ) -> TurnContext {
        let memories = session.refresh_memories(retrieved);
        let mut history = session.history().lock().await;
        history.add([(TurnRole::User, user_input)]);
        TurnContext {
            memories,
            history: history.messages(),
        }
    }

    /// `prepare_turn` with retrieval through `retriever`. A failed search
    /// still yields the cached memories and the history.
    pub async fn prepare_turn_with(
        &self,
        session: &SessionHandle,
        user_input: &str,
        retriever: &dyn Retriever,
    ) -> TurnContext {
        let retrieved = match retriever.search(user_input).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Memory retrieval failed: {}", e);
                Vec::new()
            }
        };
        self.prepare_turn(session, user_input, retrieved).await
    }

    /// Record the agent's reply and log the exchange durably
    pub async fn finish_turn(
        &self,
        session: &SessionHandle,
        user_input: &str,
        agent_response: &str,
    ) -> Result<()> {
        session
            .history()
            .lock()
            .await
            .add([(TurnRole::Agent, agent_response)]);
        self.store.record_dialogue(user_input, agent_response).await
    }

    /// Queue an extracted item for idle-time consolidation
    pub fn buffer(&self, kind: BufferKind, content: Value) -> Uuid {
        self.buffers.push(kind, content)
    }

    /// Run a consolidation pass now
    pub async fn consolidate_now(&self) -> PassReport {
        self.scheduler.run_pass().await
    }
}
