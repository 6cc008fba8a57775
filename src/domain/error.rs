//! Error taxonomy for the training pipeline.
//!
//! Library code returns [`TrainError`]; the application and CLI layers wrap
//! it in `anyhow` with extra context.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data, assembling batches, training or
/// checkpointing.
#[derive(Debug, Error)]
pub enum TrainError {
    /// The input bundle is missing a required array or an array is malformed.
    #[error("Bundle format error: {message}")]
    Format {
        /// What is wrong with the bundle
        message: String,
    },

    /// A sample index outside `[0, len)` was requested.
    #[error("Sample index {index} out of range for a dataset of {len} samples")]
    Index {
        /// The requested index
        index: usize,
        /// Number of samples in the store
        len: usize,
    },

    /// A pass over the data would yield no batches at all.
    #[error("Epoch would produce no batches: {samples} samples with batch size {batch_size}")]
    EmptyEpoch {
        /// Number of samples in the store
        samples: usize,
        /// Configured batch size
        batch_size: usize,
    },

    /// A configuration value is unusable or disagrees with the data.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Which value is wrong and why
        message: String,
    },

    /// Reading or writing a file failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        /// The file being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint could not be encoded, decoded or applied.
    #[error("Checkpoint error: {message}")]
    Checkpoint {
        /// Description of the failure
        message: String,
    },
}

impl TrainError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format { message: message.into() }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint { message: message.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Result alias used across the library layers.
pub type TrainResult<T> = Result<T, TrainError>;
