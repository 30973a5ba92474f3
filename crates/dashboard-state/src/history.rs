//! Bounded most-recent-first sequences (activity feed, alert history).
//!
//! Pushing past capacity silently drops the oldest entries.

use std::collections::VecDeque;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::store::Store;

pub const ACTIVITY_FEED_CAPACITY: usize = 8;
pub const ALERT_HISTORY_CAPACITY: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct History<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Build from items already ordered most-recent-first, keeping the newest
    /// `capacity` of them.
    pub fn from_recent_first(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        let mut history = Self::new(capacity);
        history.items.extend(items.into_iter().take(history.capacity));
        history
    }

    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items.into()
    }
}

/// Prepend `item` to the JSON array stored under `key`, capped at `capacity`.
pub fn push_bounded<T: Serialize>(store: &Store, key: &str, item: &T, capacity: usize) {
    let item = match serde_json::to_value(item) {
        Ok(item) => item,
        Err(err) => {
            warn!(key, error = %err, "history entry did not serialize");
            return;
        }
    };
    store.update(key, |previous| {
        let existing = previous
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut history = History::from_recent_first(capacity, existing);
        history.push(item);
        Value::Array(history.into_vec())
    });
}

/// Decode the history stored under `key`.
pub fn read_history<T: DeserializeOwned>(store: &Store, key: &str) -> Vec<T> {
    store.get_as::<Vec<T>>(key).unwrap_or_default()
}
