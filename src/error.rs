//! Error taxonomy for the channel subsystem (spec §7).
//!
//! `FilteredOut` has no variant here: it is a silent `enqueue` outcome, not
//! an error. The channel never surfaces errors synchronously from
//! `enqueue`; everything below reaches a [`crate::delegate::Delegate`] or a
//! log line, never the caller that submitted the record.

use thiserror::Error;

/// Invalid [`crate::config::GroupConfig`] construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("group_id must not be empty")]
    EmptyGroupId,
    #[error("batch_size_limit must be a positive integer")]
    InvalidBatchSizeLimit,
    #[error("pending_batches_limit must be a positive integer")]
    InvalidPendingBatchesLimit,
}

/// Errors from the log store collaborator.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store refused to persist the record")]
    SaveFailed,
    #[error("store load failed: {0}")]
    LoadFailed(String),
    #[error("store delete failed: {0}")]
    DeleteFailed(String),
}

/// Errors from the ingestion transport, before classification into
/// recoverable/non-recoverable (spec §6: "Response status >=400 and <500 is
/// non-recoverable except for 401/403, which the token-exchange layer
/// handles elsewhere").
#[derive(Debug, Clone, Error)]
pub enum IngestionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("ingestion timed out")]
    Timeout,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
}

impl IngestionError {
    /// Whether this failure is transient (§7 `IngestionRecoverable`):
    /// network/timeout errors, 5xx responses, or 401/403 (not this layer's
    /// job to treat as terminal).
    pub fn is_recoverable(&self) -> bool {
        match self {
            IngestionError::Network(_) | IngestionError::Timeout => true,
            IngestionError::Http { status, .. } => {
                *status >= 500 || *status == 401 || *status == 403
            }
        }
    }
}

impl From<reqwest::Error> for IngestionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestionError::Timeout
        } else {
            IngestionError::Network(err.to_string())
        }
    }
}

/// The error surfaced to `didFailSendingLog` (spec §7
/// `IngestionNonRecoverable` / `Cancelled`). Recoverable failures never
/// reach a delegate as an error: they drive `ingestionDidPause` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("non-recoverable send failure: http {status}: {message}")]
    NonRecoverable { status: u16, message: String },
    #[error("batch cancelled by disable-with-wipe")]
    Cancelled,
}

impl DeliveryError {
    pub(crate) fn from_ingestion(err: &IngestionError) -> Self {
        match err {
            IngestionError::Http { status, message } => DeliveryError::NonRecoverable {
                status: *status,
                message: message.clone(),
            },
            IngestionError::Network(message) => DeliveryError::NonRecoverable {
                status: 0,
                message: message.clone(),
            },
            IngestionError::Timeout => DeliveryError::NonRecoverable {
                status: 0,
                message: "timeout".to_string(),
            },
        }
    }
}
