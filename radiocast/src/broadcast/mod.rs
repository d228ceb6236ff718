//! Listener-facing side of the pipeline
//!
//! Reads the encoded stream once and serves it to any number of HTTP
//! listeners, each with its own bounded queue.

/// Broadcast error types
pub mod error;

/// Per-listener fan-out
pub mod fanout;

/// HTTP endpoint
pub mod server;

// Re-export commonly used types
pub use error::{BroadcastError, BroadcastResult};
pub use fanout::{Broadcaster, ClientId, DistributorStats, Subscription};
pub use server::{empty_hub, ServerState, SharedBroadcaster};
