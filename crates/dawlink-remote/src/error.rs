//! Error types for the remote plugin channel.

use std::io;

/// Errors produced by the transport and the endpoints built on it.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The shared-memory key search was exhausted without an exclusive create.
    #[error("shared memory allocation failed: {0}")]
    AllocationFailed(#[source] io::Error),

    /// No segment exists for the given key.
    #[error("no shared memory segment for key {key}: {source}")]
    NotFound {
        key: i32,
        #[source]
        source: io::Error,
    },

    /// A segment exists but could not be mapped into this process.
    #[error("failed to map shared memory segment {key}: {source}")]
    AttachFailed {
        key: i32,
        #[source]
        source: io::Error,
    },

    /// A process-shared semaphore could not be initialized.
    #[error("semaphore initialization failed: {0}")]
    Semaphore(#[source] io::Error),

    /// A framed message would not fit into an empty FIFO.
    #[error("message of {0} bytes exceeds FIFO capacity")]
    MessageTooLarge(usize),

    /// The peer sent something the dispatcher cannot make sense of.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer reported `GeneralFailure`.
    #[error("peer reported general failure")]
    PeerFailure,

    /// Spawning or supervising the worker process failed.
    #[error("worker process error: {0}")]
    Worker(#[source] io::Error),

    /// An audio block had the wrong number of samples for the negotiated
    /// channel count and block size.
    #[error("audio block size mismatch: expected {expected} samples, got {actual}")]
    BlockSize { expected: usize, actual: usize },
}
