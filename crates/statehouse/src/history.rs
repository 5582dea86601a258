#![forbid(unsafe_code)]

//! Bounded record of committed key changes, newest last.
//!
//! # Invariants
//!
//! - `len()` never exceeds the configured capacity; the oldest entry is
//!   dropped first.
//! - A capacity of 0 records nothing.

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;
use web_time::{SystemTime, UNIX_EPOCH};

/// One committed change of one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            key: key.into(),
            old_value,
            new_value,
            timestamp,
        }
    }
}

/// Ring buffer of [`HistoryEntry`] values.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Remove and return the newest entry.
    pub fn pop(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    /// The newest `limit` entries (all when `None`), oldest first.
    #[must_use]
    pub fn recent(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let take = limit.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
