//! Error types for the non-realtime side of the engine
//!
//! The render path never fails: invalid indices and positions are ignored or
//! clamped there. Errors only come from starting worker threads and from
//! buffer sources feeding the loaders.

use thiserror::Error;

/// Errors that can occur while loading a deck
#[derive(Error, Debug)]
pub enum LoadError {
    /// The buffer source reported a failure
    #[error("Failed to read '{name}': {reason}")]
    Source { name: String, reason: String },

    /// The source produced no audio frames
    #[error("'{0}' contains no audio")]
    EmptyAudio(String),

    /// No such deck
    #[error("Player {0} does not exist")]
    InvalidPlayer(usize),

    /// The deck's worker thread is gone
    #[error("Loader for player {0} has stopped")]
    LoaderStopped(usize),
}

/// Errors that can occur while starting the model
#[derive(Error, Debug)]
pub enum ModelError {
    /// Failed to spawn a worker thread
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The consumer thread is already running
    #[error("Consumer thread already running")]
    AlreadyRunning,
}

/// Result type for loader operations
pub type LoadResult<T> = Result<T, LoadError>;
