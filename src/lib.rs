//! Mira memory - working-memory lifecycle for a conversational agent
//!
//! Keeps the per-session state a long-running agent needs on every turn:
//! - A bounded, time-aware dialogue window per session
//! - A turn-decaying cache of retrieved long-term memories
//! - Ephemeral extraction buffers drained by an idle-time consolidator

pub mod config;
pub mod consolidation;
pub mod engine;
pub mod memory;

pub use config::{CacheConfig, HistoryConfig, IdleConfig, MemoryConfig};
pub use consolidation::{
    ActivityClock, BufferKind, BufferedItem, Consolidator, DurableStore, EphemeralBuffers,
    FileStore, HeuristicConsolidator, IdleConsolidationScheduler, PassReport, RecordKind,
    SchedulerHandle, SchedulerState,
};
pub use engine::{MemoryEngine, TurnContext};
pub use memory::{
    ChatHistoryManager, DialogueTurn, RetrievedMemory, Retriever, SessionHandle,
    SessionMemoryCache, SessionRegistry, TiktokenCounter, TokenCounter, TurnRole,
};

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur in the memory subsystem
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Consolidator error: {0}")]
    Consolidator(String),

    #[error("Durable store error: {0}")]
    Store(String),

    #[error("Retriever error: {0}")]
    Retriever(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
