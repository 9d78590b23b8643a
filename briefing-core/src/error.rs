//! Error types for the checkpoint store.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reading or writing checkpoint state.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize failed: {reason}")]
    Serialize { reason: String },

    /// The checkpoint says `complete` but its artifact cannot back it up.
    #[error("checkpoint for {phase} is corrupted: {reason}")]
    Corrupted { phase: String, reason: String },

    #[error("checkpoint for {phase} is not complete")]
    NotComplete { phase: String },

    #[error("checkpoint version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the orchestrator should answer with a re-run of the phase.
    /// A checkpoint from a newer format is not corruption: it is left alone
    /// and the run stops.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}
