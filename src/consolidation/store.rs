//! Durable storage for consolidated memories.
//!
//! `FileStore` directory layout:
//!   {store_dir}/facts.jsonl
//!   {store_dir}/preferences.jsonl
//!   {store_dir}/important_events.jsonl
//!   {store_dir}/dialogues.jsonl
//!   {store_dir}/profile.json
//!   {store_dir}/focus_events.json

use super::RecordKind;
use crate::memory::{RetrievedMemory, Retriever};
use crate::{MemoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Upper bound on keyword search results
const MAX_SEARCH_HITS: usize = 5;

/// Persistence consumed by the consolidation pass
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persist one canonical item
    async fn save(&self, kind: RecordKind, item: Value) -> Result<()>;

    /// Current user profile (an empty object if none)
    async fn load_profile(&self) -> Result<Value>;

    /// Most recent dialogue log entries, oldest first
    async fn recent_dialogues(&self, limit: usize) -> Result<Vec<Value>>;

    /// Short-term focus events that have not expired. Implementations may
    /// drop expired events from storage as a side effect.
    async fn active_focus_events(&self) -> Result<Vec<Value>>;
}

/// JSON/JSONL files in one directory
pub struct FileStore {
    dir: PathBuf,
    /// Serialises read-modify-write of profile.json and focus_events.json
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store, creating the directory if needed.
    pub async fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        info!("Durable store at {:?}", dir);
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn jsonl_path(&self, kind: RecordKind) -> Option<PathBuf> {
        let name = match kind {
            RecordKind::Fact => "facts.jsonl",
            RecordKind::Preference => "preferences.jsonl",
            RecordKind::ImportantEvent => "important_events.jsonl",
            RecordKind::Profile => return None,
        };
        Some(self.dir.join(name))
    }

    fn id_prefix(kind: RecordKind) -> &'static str {
        match kind {
            RecordKind::Fact => "fact",
            RecordKind::Preference => "preference",
            RecordKind::ImportantEvent => "event",
            RecordKind::Profile => "profile",
        }
    }

    fn profile_path(&self) -> PathBuf {
        self.dir.join("profile.json")
    }

    fn dialogues_path(&self) -> PathBuf {
        self.dir.join("dialogues.jsonl")
    }

    fn focus_events_path(&self) -> PathBuf {
        self.dir.join("focus_events.json")
    }

    /// Append a user/agent exchange to the dialogue log
    pub async fn record_dialogue(&self, user_input: &str, agent_response: &str) -> Result<()> {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "user": user_input,
            "agent": agent_response,
        });
        append_line(&self.dialogues_path(), &entry).await
    }

    /// Add a short-term focus event; `expire_time` is RFC 3339
    pub async fn save_focus_event(
        &self,
        content: &str,
        event_time: &str,
        expire_time: &str,
        tags: Vec<String>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.focus_events_path();
        let mut events = read_json_array(&path).await?;
        events.push(json!({
            "id": format!("focus_{}", uuid::Uuid::new_v4().simple()),
            "created_at": Utc::now().to_rfc3339(),
            "event_time": event_time,
            "expire_time": expire_time,
            "content": content,
            "tags": tags,
        }));
        write_json(&path, &Value::Array(events)).await
    }

    /// Every item saved under `kind`, oldest first
    pub async fn load_all(&self, kind: RecordKind) -> Result<Vec<Value>> {
        match self.jsonl_path(kind) {
            Some(path) => read_jsonl(&path).await,
            None => Ok(vec![self.load_profile().await?]),
        }
    }

    async fn merge_profile(&self, updates: Value) -> Result<()> {
        let updates = match updates {
            Value::Object(map) => map,
            other => {
                return Err(MemoryError::Store(format!(
                    "profile update must be a JSON object, got {}",
                    other
                )))
            }
        };

        let _guard = self.write_lock.lock().await;
        let mut profile = match self.load_profile().await? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let changed = updates.len();
        for (key, value) in updates {
            profile.insert(key, value);
        }
        write_json(&self.profile_path(), &Value::Object(profile)).await?;
        debug!("Merged {} profile fields", changed);
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn save(&self, kind: RecordKind, item: Value) -> Result<()> {
        let Some(path) = self.jsonl_path(kind) else {
            return self.merge_profile(item).await;
        };
        let mut item = item;
        if let Value::Object(map) = &mut item {
            if !map.contains_key("id") {
                map.insert(
                    "id".to_string(),
                    json!(format!("{}_{}", Self::id_prefix(kind), uuid::Uuid::new_v4().simple())),
                );
            }
        }
        append_line(&path, &item).await
    }

    async fn load_profile(&self) -> Result<Value> {
        let path = self.profile_path();
        if !path.exists() {
            return Ok(Value::Object(Map::new()));
        }
        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn recent_dialogues(&self, limit: usize) -> Result<Vec<Value>> {
        let all = read_jsonl(&self.dialogues_path()).await?;
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn active_focus_events(&self) -> Result<Vec<Value>> {
        let _guard = self.write_lock.lock().await;
        let path = self.focus_events_path();
        let events = read_json_array(&path).await?;
        let total = events.len();
        let active = filter_unexpired(events, Utc::now());
        if active.len() < total {
            write_json(&path, &Value::Array(active.clone())).await?;
            debug!("Pruned {} expired focus events", total - active.len());
        }
        Ok(active)
    }
}

/// Keyword search over stored facts, preferences and important events
#[async_trait]
impl Retriever for FileStore {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedMemory>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| t.chars().count() >= 3)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for kind in [RecordKind::Fact, RecordKind::Preference, RecordKind::ImportantEvent] {
            let records = self
                .load_all(kind)
                .await
                .map_err(|e| MemoryError::Retriever(format!("loading {:?} records: {}", kind, e)))?;
            for record in records {
                let text = record
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_lowercase();
                if terms.iter().any(|term| text.contains(term.as_str())) {
                    hits.push(RetrievedMemory::from_hit(record));
                }
                if hits.len() >= MAX_SEARCH_HITS {
                    return Ok(hits);
                }
            }
        }
        Ok(hits)
    }
}

/// Keep events whose `expire_time` is still ahead of `now`.
/// Events with a missing or unparseable expiry are kept.
fn filter_unexpired(events: Vec<Value>, now: DateTime<Utc>) -> Vec<Value> {
    events
        .into_iter()
        .filter(|event| {
            event
                .get("expire_time")
                .and_then(|t| t.as_str())
                .and_then(parse_timestamp)
                .map_or(true, |expire| now < expire)
        })
        .collect()
}

/// RFC 3339, or a naive ISO timestamp (`T` or space separated) read as UTC
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

async fn append_line(path: &Path, value: &Value) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", value).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).await?;
    let mut items = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => items.push(value),
            Err(e) => warn!("Skipping corrupt line in {:?}: {}", path, e),
        }
    }
    Ok(items)
}

async fn read_json_array(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).await?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) | Err(_) => {
            warn!("{:?} is not a JSON array, treating as empty", path);
            Ok(Vec::new())
        }
    }
}

async fn write_json(path: &Path, value: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
