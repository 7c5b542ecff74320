//! Clipboard history reconciliation
//!
//! Local copies and texts received from peers merge into one bounded log:
//!
//! - Identity is the text itself. Upserting a text that is already present
//!   refreshes its timestamp instead of adding a duplicate.
//! - Provenance is sticky: an item first recorded as `local` stays `local`
//!   when a peer later sends the same text.
//! - Reads are newest-first by timestamp.
//! - At most `max_items` (default 20) are kept; the oldest fall off.

pub mod store;

use crate::time::{now_millis, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub use store::{PersistedState, StateFile, StoreError};

/// Default history capacity.
pub const MAX_HISTORY: usize = 20;

/// Where an item originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Local,
    Synced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: Uuid,
    pub text: String,
    pub timestamp: Timestamp,
    pub source: Source,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    /// `false` when an item with the same text was refreshed instead, or
    /// when the new item was too old to stay in a full history.
    pub inserted: bool,
    /// Id of the new or refreshed item.
    pub id: Uuid,
}

/// Bounded, deduplicated, newest-first history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    items: Vec<HistoryItem>,
    max_items: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }

    pub fn with_capacity(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items,
        }
    }

    /// Rebuild from persisted items, enforcing the history invariants.
    ///
    /// Duplicate texts keep their newest copy.
    pub fn from_items(items: Vec<HistoryItem>, max_items: usize) -> Self {
        let mut history = Self {
            items,
            max_items,
        };
        history.sort();

        let mut seen = HashSet::new();
        history.items.retain(|item| seen.insert(item.text.clone()));
        history.items.truncate(max_items);
        history
    }

    /// Record `text`, merging with an existing item of the same text.
    ///
    /// `timestamp` overrides the current time, e.g. with the sender's
    /// timestamp for synced items.
    pub fn upsert(&mut self, text: &str, source: Source, timestamp: Option<Timestamp>) -> Upsert {
        let timestamp = timestamp.unwrap_or_else(now_millis);

        let outcome = match self.items.iter().position(|item| item.text == text) {
            Some(index) => {
                let mut existing = self.items.remove(index);
                existing.timestamp = timestamp;
                let id = existing.id;
                self.items.insert(0, existing);
                Upsert {
                    inserted: false,
                    id,
                }
            }
            None => {
                let item = HistoryItem {
                    id: Uuid::new_v4(),
                    text: text.to_string(),
                    timestamp,
                    source,
                };
                let id = item.id;
                self.items.insert(0, item);
                Upsert { inserted: true, id }
            }
        };

        self.sort();
        self.items.truncate(self.max_items);

        // An item older than everything in a full history is dropped at once.
        let retained = self.items.iter().any(|item| item.id == outcome.id);
        Upsert {
            inserted: outcome.inserted && retained,
            ..outcome
        }
    }

    /// Remove the item with `id`. Returns whether anything was removed.
    pub fn remove(&mut self, id: Uuid) -> bool {
        match self.items.iter().position(|item| item.id == id) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Items, newest first.
    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    /// Most recent item, shown as the current clipboard.
    pub fn latest(&self) -> Option<&HistoryItem> {
        self.items.first()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<HistoryItem> {
        self.items
    }

    // Stable, so equal timestamps keep most-recently-touched first.
    fn sort(&mut self) {
        self.items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_new_item() {
        let mut history = History::new();
        let outcome = history.upsert("hello", Source::Local, Some(100));

        assert!(outcome.inserted);
        assert_eq!(history.len(), 1);
        let item = history.latest().unwrap();
        assert_eq!(item.id, outcome.id);
        assert_eq!(item.text, "hello");
        assert_eq!(item.timestamp, 100);
        assert_eq!(item.source, Source::Local);
    }

    #[test]
    fn test_bounded_to_newest_twenty() {
        let mut history = History::new();
        for i in 0..25 {
            history.upsert(&format!("text {}", i), Source::Local, Some(1000 + i));
        }

        assert_eq!(history.len(), MAX_HISTORY);
        let texts: Vec<&str> = history.items().iter().map(|i| i.text.as_str()).collect();
        let expected: Vec<String> = (5..25).rev().map(|i| format!("text {}", i)).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_bounded_without_timestamps() {
        let mut history = History::new();
        for i in 0..25 {
            history.upsert(&format!("text {}", i), Source::Local, None);
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history.latest().unwrap().text, "text 24");
    }

    #[test]
    fn test_too_old_item_is_not_reported_inserted() {
        let mut history = History::with_capacity(2);
        history.upsert("b", Source::Local, Some(200));
        history.upsert("c", Source::Local, Some(300));

        let outcome = history.upsert("a", Source::Synced, Some(100));
        assert!(!outcome.inserted);
        assert_eq!(history.len(), 2);
        assert!(history.items().iter().all(|i| i.text != "a"));
    }

    #[test]
    fn test_duplicate_keeps_local_provenance() {
        let mut history = History::new();
        let first = history.upsert("hello", Source::Local, Some(100));
        history.upsert("other", Source::Local, Some(150));

        let second = history.upsert("hello", Source::Synced, Some(200));
        assert!(!second.inserted);
        assert_eq!(second.id, first.id);
        assert_eq!(history.len(), 2);

        let item = history.latest().unwrap();
        assert_eq!(item.text, "hello");
        assert_eq!(item.source, Source::Local);
        assert_eq!(item.timestamp, 200);
    }

    #[test]
    fn test_synced_item_stays_synced_when_copied_locally() {
        let mut history = History::new();
        history.upsert("hello", Source::Synced, Some(100));
        history.upsert("hello", Source::Local, Some(200));
        assert_eq!(history.latest().unwrap().source, Source::Synced);
    }

    #[test]
    fn test_read_order_follows_timestamps() {
        let mut history = History::new();
        history.upsert("new", Source::Local, Some(300));
        // Remote item with an older sender timestamp arrives later
        history.upsert("old", Source::Synced, Some(100));
        history.upsert("middle", Source::Synced, Some(200));

        let texts: Vec<&str> = history.items().iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["new", "middle", "old"]);
    }

    #[test]
    fn test_remove_by_id() {
        let mut history = History::new();
        let a = history.upsert("a", Source::Local, Some(1));
        history.upsert("b", Source::Local, Some(2));

        assert!(history.remove(a.id));
        assert_eq!(history.len(), 1);
        assert!(!history.remove(a.id));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_from_items_normalizes() {
        let item = |text: &str, timestamp| HistoryItem {
            id: Uuid::new_v4(),
            text: text.to_string(),
            timestamp,
            source: Source::Synced,
        };
        let items = vec![item("a", 1), item("b", 5), item("a", 9), item("c", 3)];

        let history = History::from_items(items, 2);
        let texts: Vec<(&str, i64)> = history
            .items()
            .iter()
            .map(|i| (i.text.as_str(), i.timestamp))
            .collect();
        assert_eq!(texts, vec![("a", 9), ("b", 5)]);
    }

    #[test]
    fn test_source_serialization() {
        assert_eq!(serde_json::to_string(&Source::Local).unwrap(), "\"local\"");
        assert_eq!(serde_json::to_string(&Source::Synced).unwrap(), "\"synced\"");
    }
}
