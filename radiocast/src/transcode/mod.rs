//! Encoder subprocess bridge
//!
//! Turns the raw s32le PCM stream from capture into the configured output
//! codec by piping it through an external encoder (ffmpeg by default).

/// Encoder process supervision
pub mod bridge;

/// Encoder command line construction
pub mod command;

/// Transcoding error types
pub mod error;

// Re-export commonly used types
pub use bridge::{TranscodeBridge, TranscodeStats};
pub use command::{encoder_sample_rate, EncoderCommand, DEFAULT_ENCODER_SAMPLE_RATE};
pub use error::{TranscodeError, TranscodeResult};
