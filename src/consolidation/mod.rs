//! Background consolidation of extracted memories
//!
//! Turn handlers append extracted items to ephemeral buffers and stamp the
//! activity clock. Once the agent has been idle long enough, the scheduler
//! hands each non-empty buffer to a `Consolidator`, persists what it returns
//! into a `DurableStore`, and clears the consumed items.

mod activity;
mod buffers;
mod heuristic;
mod scheduler;
mod store;

pub use activity::ActivityClock;
pub use buffers::{BufferKind, BufferStatus, BufferedItem, EphemeralBuffers};
pub use heuristic::HeuristicConsolidator;
pub use scheduler::{
    BufferOutcome, IdleConsolidationScheduler, PassReport, SchedulerHandle, SchedulerState,
};
pub use store::{DurableStore, FileStore};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a durable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Fact,
    Preference,
    /// Field updates merged into the user profile
    Profile,
    /// Long-lived, life-shaping event
    ImportantEvent,
}

impl From<BufferKind> for RecordKind {
    fn from(kind: BufferKind) -> Self {
        match kind {
            BufferKind::Fact => Self::Fact,
            BufferKind::Preference => Self::Preference,
            BufferKind::ProfileUpdate => Self::Profile,
        }
    }
}

/// Merges, deduplicates and canonicalises buffered items
#[async_trait]
pub trait Consolidator: Send + Sync {
    /// Canonicalise one buffer's snapshot.
    ///
    /// For `ProfileUpdate`, `context` carries the current durable profile and
    /// conflicts resolve to the latest timestamp.
    async fn consolidate(
        &self,
        kind: BufferKind,
        items: &[BufferedItem],
        context: Option<&Value>,
    ) -> Result<Vec<Value>>;

    /// Pick out newly significant long-lived events from recent dialogue and
    /// the active short-term focus events.
    async fn identify_significant_events(
        &self,
        recent_dialogues: &[Value],
        focus_events: &[Value],
    ) -> Result<Vec<Value>>;
}
