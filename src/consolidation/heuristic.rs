//! Model-free consolidator.
//!
//! Facts and preferences are deduplicated by normalised `content`, keeping
//! the most recent version. Profile updates are folded into a single update
//! object in timestamp order, so the latest value of each field wins; fields
//! that already hold the same value in the current profile are dropped.

use super::{BufferKind, BufferedItem, Consolidator};
use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicConsolidator;

impl HeuristicConsolidator {
    pub fn new() -> Self {
        Self
    }
}

/// Dedup key: lowercased content with collapsed whitespace
fn dedup_key(content: &Value) -> String {
    let text = match content.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => content.to_string(),
    };
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn dedup_latest(items: &[BufferedItem]) -> Vec<Value> {
    let mut ordered: Vec<&BufferedItem> = items.iter().collect();
    ordered.sort_by_key(|item| item.timestamp);

    let mut position: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<Value> = Vec::new();
    for item in ordered {
        let key = dedup_key(&item.content);
        match position.get(&key) {
            Some(&index) => result[index] = item.content.clone(),
            None => {
                position.insert(key, result.len());
                result.push(item.content.clone());
            }
        }
    }
    result
}

fn merge_profile_updates(items: &[BufferedItem], current: Option<&Value>) -> Vec<Value> {
    let mut ordered: Vec<&BufferedItem> = items.iter().collect();
    ordered.sort_by_key(|item| item.timestamp);

    let mut merged = Map::new();
    for item in ordered {
        let fields = match item.content.get("profile_data") {
            Some(Value::Object(data)) => data,
            _ => match &item.content {
                Value::Object(data) => data,
                _ => continue,
            },
        };
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
    }

    if let Some(Value::Object(profile)) = current {
        merged.retain(|key, value| profile.get(key) != Some(value));
    }

    if merged.is_empty() {
        Vec::new()
    } else {
        vec![Value::Object(merged)]
    }
}

#[async_trait]
impl Consolidator for HeuristicConsolidator {
    async fn consolidate(
        &self,
        kind: BufferKind,
        items: &[BufferedItem],
        context: Option<&Value>,
    ) -> Result<Vec<Value>> {
        Ok(match kind {
            BufferKind::Fact | BufferKind::Preference => dedup_latest(items),
            BufferKind::ProfileUpdate => merge_profile_updates(items, context),
        })
    }

    async fn identify_significant_events(
        &self,
        _recent_dialogues: &[Value],
        _focus_events: &[Value],
    ) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(kind: BufferKind, content: Value, minutes_ago: i64) -> BufferedItem {
        BufferedItem::new(kind, content).with_timestamp(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn test_facts_deduplicated_keeping_latest() {
        let items = vec![
            at(BufferKind::Fact, json!({"content": "Has a cat", "confidence": 0.5}), 10),
            at(BufferKind::Fact, json!({"content": "lives in Lyon"}), 8),
            at(BufferKind::Fact, json!({"content": "has  a cat", "confidence": 0.9}), 2),
        ];

        let result = HeuristicConsolidator::new()
            .consolidate(BufferKind::Fact, &items, None)
            .await
            .unwrap();

        assert_eq!(
            result,
            vec![
                json!({"content": "has  a cat", "confidence": 0.9}),
                json!({"content": "lives in Lyon"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_profile_latest_wins() {
        let items = vec![
            at(BufferKind::ProfileUpdate, json!({"profile_data": {"city": "Paris"}}), 1),
            at(BufferKind::ProfileUpdate, json!({"profile_data": {"city": "Berlin", "age": 30}}), 20),
        ];

        let result = HeuristicConsolidator::new()
            .consolidate(BufferKind::ProfileUpdate, &items, Some(&json!({})))
            .await
            .unwrap();

        assert_eq!(result, vec![json!({"city": "Paris", "age": 30})]);
    }

    #[tokio::test]
    async fn test_profile_noop_fields_dropped() {
        let items = vec![at(BufferKind::ProfileUpdate, json!({"name": "Ada"}), 1)];
        let current = json!({"name": "Ada"});

        let result = HeuristicConsolidator::new()
            .consolidate(BufferKind::ProfileUpdate, &items, Some(&current))
            .await
            .unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_no_significant_events() {
        let events = HeuristicConsolidator::new()
            .identify_significant_events(&[json!({"user": "hi"})], &[])
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
