#![forbid(unsafe_code)]

use crate::persist::PersistenceConfig;

/// Default number of history entries kept for undo.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Construction-time settings for a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum history entries; 0 disables undo recording.
    pub history_limit: usize,
    /// Persistence target and whitelist. `None` keeps state in memory only.
    pub persistence: Option<PersistenceConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            persistence: None,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = Some(persistence);
        self
    }
}
