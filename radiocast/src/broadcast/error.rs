//! Broadcast error types

use thiserror::Error;

use crate::broadcast::fanout::ClientId;

/// Broadcast-related errors
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// Upstream has failed or not started; there is nothing to stream
    #[error("Pipeline unavailable: the audio stream is not running")]
    PipelineUnavailable,

    /// A listener went away; this is normal termination, not a fault
    #[error("Client {0} disconnected")]
    ClientDisconnected(ClientId),

    /// Failed to bind the listen address
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Result type for broadcast operations
pub type BroadcastResult<T> = Result<T, BroadcastError>;
