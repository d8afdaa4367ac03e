//! Idle-time consolidation scheduler.
//!
//! States: `IdleWatch` (initial) and `Consolidating`. On every poll the
//! watcher compares the time since the last interaction with the idle
//! threshold. Once exceeded, and if any buffer holds items, it runs one
//! consolidation pass. Afterwards the activity baseline is reset so the
//! next pass needs a full idle threshold again.
//!
//! Each buffer is consolidated independently: a failing consolidator or
//! store leaves that buffer untouched for the next pass and does not affect
//! the others. Buffer locks are only held to snapshot and to remove the
//! consumed items, never across the consolidator call.

use super::{
    ActivityClock, BufferKind, BufferedItem, Consolidator, DurableStore, EphemeralBuffers,
    RecordKind,
};
use crate::config::IdleConfig;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    IdleWatch,
    Consolidating,
}

/// Result of consolidating one buffer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferOutcome {
    pub kind: BufferKind,
    /// Items taken from the buffer for this pass
    pub snapshotted: usize,
    /// Canonical items written to the store
    pub persisted: usize,
    /// Set when the buffer was kept for retry
    pub error: Option<String>,
}

impl BufferOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one consolidation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// One entry per non-empty buffer
    pub buffers: Vec<BufferOutcome>,
    pub significant_events: usize,
    pub event_error: Option<String>,
}

impl PassReport {
    pub fn outcome(&self, kind: BufferKind) -> Option<&BufferOutcome> {
        self.buffers.iter().find(|o| o.kind == kind)
    }

    /// True when every step of the pass succeeded
    pub fn is_clean(&self) -> bool {
        self.event_error.is_none() && self.buffers.iter().all(BufferOutcome::succeeded)
    }
}

/// Flips the state back to `IdleWatch` however the pass ends
struct ConsolidatingGuard<'a>(&'a AtomicBool);

impl<'a> ConsolidatingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ConsolidatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct IdleConsolidationScheduler {
    config: IdleConfig,
    activity: Arc<ActivityClock>,
    buffers: Arc<EphemeralBuffers>,
    consolidator: Arc<dyn Consolidator>,
    store: Arc<dyn DurableStore>,
    consolidating: AtomicBool,
    /// Keeps the ticker and manual triggers from overlapping passes
    pass_lock: Mutex<()>,
}

impl IdleConsolidationScheduler {
    pub fn new(
        config: IdleConfig,
        activity: Arc<ActivityClock>,
        buffers: Arc<EphemeralBuffers>,
        consolidator: Arc<dyn Consolidator>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            config,
            activity,
            buffers,
            consolidator,
            store,
            consolidating: AtomicBool::new(false),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.consolidating.load(Ordering::Acquire) {
            SchedulerState::Consolidating
        } else {
            SchedulerState::IdleWatch
        }
    }

    pub fn config(&self) -> &IdleConfig {
        &self.config
    }

    /// One watcher wake-up evaluated at `now`.
    ///
    /// Returns the pass report if a consolidation pass ran.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Option<PassReport> {
        let idle = self.activity.idle_for(now);
        if idle <= self.config.idle_threshold() {
            return None;
        }

        let started = Instant::now();
        let report = if self.buffers.is_empty() {
            debug!("Idle for {}s but all buffers are empty", idle.as_secs());
            None
        } else {
            info!(
                "Idle for {}s with buffered items ({:?}), consolidating",
                idle.as_secs(),
                self.buffers.status()
            );
            Some(self.run_pass().await)
        };

        // Reset the baseline whether or not a pass ran, so the watcher does
        // not re-trigger on every poll.
        let elapsed = chrono::Duration::from_std(started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.activity.touch_at(now + elapsed);
        report
    }

    /// Run a consolidation pass immediately, regardless of idleness
    pub async fn run_pass(&self) -> PassReport {
        let _pass = self.pass_lock.lock().await;
        let _state = ConsolidatingGuard::enter(&self.consolidating);

        let mut report = PassReport::default();
        for kind in BufferKind::ALL {
            if let Some(outcome) = self.consolidate_buffer(kind).await {
                report.buffers.push(outcome);
            }
        }

        match self.identify_significant_events().await {
            Ok(count) => report.significant_events = count,
            Err(e) => {
                warn!("Significant-event identification failed: {}", e);
                report.event_error = Some(e.to_string());
            }
        }

        info!(
            "Consolidation pass finished ({} buffers, {} new events, clean={})",
            report.buffers.len(),
            report.significant_events,
            report.is_clean()
        );
        report
    }

    async fn consolidate_buffer(&self, kind: BufferKind) -> Option<BufferOutcome> {
        let snapshot = self.buffers.snapshot(kind);
        if snapshot.is_empty() {
            return None;
        }

        let mut persisted = 0;
        let result = self.persist_snapshot(kind, &snapshot, &mut persisted).await;

        let error = match result {
            Ok(()) => {
                let ids: HashSet<_> = snapshot.iter().map(|item| item.id).collect();
                let removed = self.buffers.remove(kind, &ids);
                info!(
                    "Consolidated {} {} items into {} records, buffer cleared of {}",
                    snapshot.len(),
                    kind,
                    persisted,
                    removed
                );
                None
            }
            Err(e) => {
                warn!(
                    "Consolidating {} buffer failed after {} writes, keeping {} items for retry: {}",
                    kind,
                    persisted,
                    snapshot.len(),
                    e
                );
                Some(e.to_string())
            }
        };

        Some(BufferOutcome {
            kind,
            snapshotted: snapshot.len(),
            persisted,
            error,
        })
    }

    async fn persist_snapshot(
        &self,
        kind: BufferKind,
        snapshot: &[BufferedItem],
        persisted: &mut usize,
    ) -> Result<()> {
        let context = match kind {
            BufferKind::ProfileUpdate => Some(self.store.load_profile().await?),
            BufferKind::Fact | BufferKind::Preference => None,
        };

        let canonical = self
            .consolidator
            .consolidate(kind, snapshot, context.as_ref())
            .await?;

        let record_kind = RecordKind::from(kind);
        for item in canonical {
            self.store.save(record_kind, item).await?;
            *persisted += 1;
        }
        Ok(())
    }

    async fn identify_significant_events(&self) -> Result<usize> {
        let dialogues = self
            .store
            .recent_dialogues(self.config.recent_dialogue_limit)
            .await?;
        let focus_events = self.store.active_focus_events().await?;
        if dialogues.is_empty() && focus_events.is_empty() {
            debug!("No dialogue or focus events to analyse, skipping event identification");
            return Ok(0);
        }

        let events = self
            .consolidator
            .identify_significant_events(&dialogues, &focus_events)
            .await?;
        let count = events.len();
        for event in events {
            self.store.save(RecordKind::ImportantEvent, event).await?;
        }
        if count > 0 {
            info!("Stored {} new significant events", count);
        }
        Ok(count)
    }

    /// Start the periodic watcher on the current tokio runtime
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            self.run_loop(token).await;
        });
        SchedulerHandle { cancel, join }
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Idle consolidation scheduler started (idle_threshold={}s, poll_interval={}s)",
            self.config.idle_threshold_seconds,
            self.config.poll_interval().as_secs()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // A pass that has started runs to completion before the
                    // stop signal is observed.
                    self.tick_at(Utc::now()).await;
                }
            }
        }

        info!("Idle consolidation scheduler stopped");
    }
}

/// Handle to a running scheduler task
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the scheduler to stop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("Idle consolidation scheduler task failed: {}", e);
        }
    }
}
