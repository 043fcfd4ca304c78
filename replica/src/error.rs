//! Error taxonomy for the recoverable execution core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The replica must not become ready with an invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A flush observed inconsistent batch data and was aborted; nothing
    /// was recorded for the slot.
    #[error("inconsistent batch for eid {eid}: {reason}")]
    Consistency { eid: u64, reason: String },

    /// Batch replay failed while installing received state. The catch-up
    /// attempt is aborted; continuing would leave this replica silently
    /// diverged from its peers.
    #[error("replay failed at eid {eid}")]
    Replay {
        eid: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("durable log I/O error")]
    Io(#[from] std::io::Error),

    #[error("durable log encoding error")]
    Codec(#[from] bincode::Error),

    /// Application hook failure, surfaced to the ordering layer.
    #[error(transparent)]
    App(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
