//! Per-group configuration.

use crate::error::ConfigError;
use std::time::Duration;

/// Relative scheduling priority of a group. Carried through for collaborators
/// that want to prioritize groups against each other; the channel itself
/// does not reorder on priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Immutable-after-attach configuration for one Channel Unit.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct GroupConfig {
    pub group_id: String,
    pub priority: Priority,
    pub flush_interval: Duration,
    pub batch_size_limit: usize,
    pub pending_batches_limit: usize,
}

impl GroupConfig {
    pub fn builder(group_id: impl Into<String>) -> GroupConfigBuilder {
        GroupConfigBuilder::new(group_id)
    }
}

/// Builder for [`GroupConfig`].
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug)]
pub struct GroupConfigBuilder {
    group_id: String,
    priority: Priority,
    flush_interval: Duration,
    batch_size_limit: usize,
    pending_batches_limit: usize,
}

impl GroupConfigBuilder {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            priority: Priority::default(),
            flush_interval: Duration::from_secs(3),
            batch_size_limit: 50,
            pending_batches_limit: 3,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the flush interval. May be `Duration::ZERO` for immediate flush
    /// on the next `check_pending_logs` after a count-triggered threshold is
    /// not yet met.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn batch_size_limit(mut self, limit: usize) -> Self {
        self.batch_size_limit = limit;
        self
    }

    pub fn pending_batches_limit(mut self, limit: usize) -> Self {
        self.pending_batches_limit = limit;
        self
    }

    /// Validate and build the configuration.
    ///
    /// Returns [`ConfigError`] if `group_id` is empty or either limit is
    /// zero (spec: "positive integer" for both limits).
    pub fn build(self) -> Result<GroupConfig, ConfigError> {
        if self.group_id.is_empty() {
            return Err(ConfigError::EmptyGroupId);
        }
        if self.batch_size_limit == 0 {
            return Err(ConfigError::InvalidBatchSizeLimit);
        }
        if self.pending_batches_limit == 0 {
            return Err(ConfigError::InvalidPendingBatchesLimit);
        }

        Ok(GroupConfig {
            group_id: self.group_id,
            priority: self.priority,
            flush_interval: self.flush_interval,
            batch_size_limit: self.batch_size_limit,
            pending_batches_limit: self.pending_batches_limit,
        })
    }
}
