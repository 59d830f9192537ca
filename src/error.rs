use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ChannelId, PostId};

/// Everything the engine can fail with.
///
/// `Clone` so one single-flight result can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Malformed metrics, negative weights or bad arguments. Fixable by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Hard-mode classification against a baseline that is missing or still training.
    #[error("baseline for channel {channel} is not ready ({posts_analyzed} eligible posts)")]
    BaselineNotReady {
        channel: ChannelId,
        posts_analyzed: usize,
    },

    /// The backing store could not be read or written. Aborts the current batch.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    /// Non-fatal per-item failures collected inside a batch.
    #[error("{0}")]
    PartialBatch(PartialBatchError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::Infrastructure(_))
    }
}

/// A single item that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub channel: Option<ChannelId>,
    pub post: Option<PostId>,
    pub error: String,
}

impl ItemFailure {
    pub fn for_channel(channel: ChannelId, error: &EngineError) -> Self {
        Self {
            channel: Some(channel),
            post: None,
            error: error.to_string(),
        }
    }

    pub fn for_post(channel: ChannelId, post: PostId, error: &EngineError) -> Self {
        Self {
            channel: Some(channel),
            post: Some(post),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialBatchError {
    pub attempted: usize,
    pub failures: Vec<ItemFailure>,
}

impl std::fmt::Display for PartialBatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} batch items failed",
            self.failures.len(),
            self.attempted
        )?;
        if let Some(first) = self.failures.first() {
            write!(f, " (first: {})", first.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialBatchError {}

/// Wraps the failures of a finished batch, if there were any.
pub fn partial_batch(attempted: usize, failures: &[ItemFailure]) -> Option<EngineError> {
    if failures.is_empty() {
        None
    } else {
        Some(EngineError::PartialBatch(PartialBatchError {
            attempted,
            failures: failures.to_vec(),
        }))
    }
}

pub(crate) fn io_failure(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Infrastructure(format!("{}: {}", context, err))
}
