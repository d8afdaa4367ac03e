//! Per-session dialogue window.
//!
//! Turns are appended as they happen and trimmed lazily whenever the window
//! is read. Maintenance applies three rules in order:
//!   1. Token budget: evict oldest turns while over `max_token_limit`, never
//!      going below the turn floor (`min_turns_to_keep * 2`).
//!   2. Cross-day: drop every turn from another calendar day that is older
//!      than `cross_day_max_age_seconds`. This rule may go below the floor.
//!   3. Retention: turns older than `retention_seconds` survive only when
//!      they are part of a continuous exchange. If filtering would leave
//!      fewer turns than the floor, the most recent floor-many turns are kept
//!      instead.

use super::natural_time::format_natural_time;
use super::token_counter::TokenCounter;
use crate::config::HistoryConfig;
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Agent => write!(f, "Agent"),
        }
    }
}

/// One stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
}

impl DialogueTurn {
    fn local_date(&self) -> NaiveDate {
        self.timestamp.with_timezone(&Local).date_naive()
    }

    /// Turn text annotated with a natural-language timestamp
    pub fn annotated(&self) -> String {
        format!("{} [{}]", self.text, format_natural_time(&self.timestamp))
    }
}

/// Bounded, chronologically ordered turn window for one session
pub struct ChatHistoryManager {
    config: HistoryConfig,
    counter: Arc<dyn TokenCounter>,
    /// Oldest first
    turns: VecDeque<DialogueTurn>,
    total_token_count: usize,
}

impl std::fmt::Debug for ChatHistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHistoryManager")
            .field("config", &self.config)
            .field("turns", &self.turns.len())
            .field("total_token_count", &self.total_token_count)
            .finish()
    }
}

impl ChatHistoryManager {
    pub fn new(config: HistoryConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            config,
            counter,
            turns: VecDeque::new(),
            total_token_count: 0,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Append turns stamped with the current time
    pub fn add<I, S>(&mut self, turns: I)
    where
        I: IntoIterator<Item = (TurnRole, S)>,
        S: Into<String>,
    {
        let now = Utc::now();
        for (role, text) in turns {
            self.push_at(role, text, now);
        }
    }

    /// Append a single turn with an explicit timestamp
    pub fn push_at(&mut self, role: TurnRole, text: impl Into<String>, timestamp: DateTime<Utc>) {
        let text = text.into();
        let token_count = self.counter.count(&text);
        self.turns.push_back(DialogueTurn {
            role,
            text,
            timestamp,
            token_count,
        });
        self.total_token_count += token_count;
    }

    /// Replace the whole history
    pub fn set_messages<I, S>(&mut self, turns: I)
    where
        I: IntoIterator<Item = (TurnRole, S)>,
        S: Into<String>,
    {
        self.clear();
        self.add(turns);
    }

    /// Run maintenance and return the window's annotated turn texts
    pub fn messages(&mut self) -> Vec<String> {
        self.messages_at(Utc::now())
    }

    /// `messages` evaluated at an explicit time
    pub fn messages_at(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.maintain(now);
        self.turns.iter().map(DialogueTurn::annotated).collect()
    }

    /// Run maintenance and render the window as a prompt block
    pub fn for_prompt_string(&mut self, now: DateTime<Utc>) -> String {
        self.maintain(now);
        self.turns
            .iter()
            .map(|turn| format!("[{}] {}", turn.role, turn.annotated()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_token_count = 0;
    }

    /// Stored turns as they are, without running maintenance
    pub fn turns(&self) -> impl Iterator<Item = &DialogueTurn> {
        self.turns.iter()
    }

    pub fn total_token_count(&self) -> usize {
        self.total_token_count
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Apply the three eviction rules as of `now`
    pub fn maintain(&mut self, now: DateTime<Utc>) {
        let before = self.turns.len();
        self.enforce_token_budget();
        self.drop_cross_day(now);
        self.apply_retention(now);

        debug_assert_eq!(
            self.total_token_count,
            self.recount(),
            "token bookkeeping drifted"
        );

        let removed = before - self.turns.len();
        if removed > 0 {
            debug!(
                "History maintenance removed {} turns ({} left, {} tokens)",
                removed,
                self.turns.len(),
                self.total_token_count
            );
        }
    }

    fn enforce_token_budget(&mut self) {
        let floor = self.config.turn_floor();
        while self.total_token_count > self.config.max_token_limit && self.turns.len() > floor {
            match self.turns.pop_front() {
                Some(removed) => self.total_token_count -= removed.token_count,
                None => break,
            }
        }
    }

    fn drop_cross_day(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&Local).date_naive();
        let max_age = Duration::seconds(self.config.cross_day_max_age_seconds);
        let mut dropped_tokens = 0;
        self.turns.retain(|turn| {
            let stale = turn.local_date() != today && now - turn.timestamp > max_age;
            if stale {
                dropped_tokens += turn.token_count;
            }
            !stale
        });
        self.total_token_count -= dropped_tokens;
    }

    fn apply_retention(&mut self, now: DateTime<Utc>) {
        let floor = self.config.turn_floor();
        if self.turns.len() <= floor {
            return;
        }

        let retention = Duration::seconds(self.config.retention_seconds);
        let continuity = Duration::seconds(self.config.continuity_threshold_seconds);

        let mut survivors: Vec<usize> = Vec::with_capacity(self.turns.len());
        for (i, turn) in self.turns.iter().enumerate() {
            if now - turn.timestamp <= retention {
                survivors.push(i);
                continue;
            }

            let continues_next = self
                .turns
                .get(i + 1)
                .is_some_and(|next| next.timestamp - turn.timestamp <= continuity);
            let continues_kept = survivors
                .last()
                .is_some_and(|&kept| turn.timestamp - self.turns[kept].timestamp <= continuity);

            if continues_next || continues_kept {
                survivors.push(i);
            }
        }

        if survivors.len() == self.turns.len() {
            return;
        }

        if survivors.len() < floor {
            let excess = self.turns.len() - floor;
            for removed in self.turns.drain(..excess) {
                self.total_token_count -= removed.token_count;
            }
            return;
        }

        let mut kept = VecDeque::with_capacity(survivors.len());
        let mut next = survivors.into_iter().peekable();
        for (i, turn) in std::mem::take(&mut self.turns).into_iter().enumerate() {
            if next.peek() == Some(&i) {
                next.next();
                kept.push_back(turn);
            } else {
                self.total_token_count -= turn.token_count;
            }
        }
        self.turns = kept;
    }

    fn recount(&self) -> usize {
        self.turns.iter().map(|t| t.token_count).sum()
    }
}
