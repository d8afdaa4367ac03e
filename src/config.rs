//! Configuration for the memory subsystem.
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial file both work.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Dialogue window settings, applied to every new session
    pub history: HistoryConfig,

    /// Retrieved-memory cache settings
    pub cache: CacheConfig,

    /// Idle consolidation settings
    pub idle: IdleConfig,

    /// Directory of the file-backed durable store
    pub store_dir: PathBuf,
}

/// Settings for a session's `ChatHistoryManager`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Model-name hint used to pick a tokenizer
    pub model: String,
    pub max_token_limit: usize,
    pub retention_seconds: i64,
    pub continuity_threshold_seconds: i64,
    /// Exchanges to keep; the turn floor is twice this
    pub min_turns_to_keep: usize,
    /// Turns from another calendar day older than this are always dropped
    pub cross_day_max_age_seconds: i64,
}

impl HistoryConfig {
    /// Minimum number of stored turns the budget and retention rules preserve
    pub fn turn_floor(&self) -> usize {
        self.min_turns_to_keep * 2
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_token_limit: 100_000,
            retention_seconds: 1800,
            continuity_threshold_seconds: 180,
            min_turns_to_keep: 10,
            cross_day_max_age_seconds: 8 * 60 * 60,
        }
    }
}

/// Settings for the `SessionMemoryCache`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of `get_and_decay` calls an item stays visible without reactivation
    pub default_ttl_turns: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_turns: 5,
        }
    }
}

/// Settings for the idle consolidation scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub idle_threshold_seconds: u64,
    pub poll_interval_seconds: u64,
    /// Dialogue entries handed to significant-event identification
    pub recent_dialogue_limit: usize,
}

impl IdleConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_threshold_seconds: 1200,
            poll_interval_seconds: 60,
            recent_dialogue_limit: 5,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            cache: CacheConfig::default(),
            idle: IdleConfig::default(),
            store_dir: default_store_dir(),
        }
    }
}

impl MemoryConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cache.default_ttl_turns == 0 {
            return Err(crate::MemoryError::Config(
                "cache.default_ttl_turns must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_store_dir(mut self, path: PathBuf) -> Self {
        self.store_dir = path;
        self
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn with_idle(mut self, idle: IdleConfig) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_default_ttl_turns(mut self, ttl: u32) -> Self {
        self.cache.default_ttl_turns = ttl;
        self
    }
}

/// `~/.mira-memory`, or a relative directory when no home is known
fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".mira-memory"))
        .unwrap_or_else(|| PathBuf::from(".mira-memory"))
}
