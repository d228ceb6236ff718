//! Global error handling
//!
//! Provides one application error type and the machine-readable error codes
//! sent to HTTP clients.
//!
//! # Features
//!
//! - `AppError` aggregates every component error via `#[from]`
//! - `ErrorCode` is serialized as `SCREAMING_SNAKE_CASE` in error bodies
//! - `ErrorContext` bundles a code, a message and an optional hint
//!
//! # Example
//!
//! ```
//! use radiocast_lib::broadcast::BroadcastError;
//! use radiocast_lib::utils::error::{AppError, ErrorCode};
//!
//! let err: AppError = BroadcastError::PipelineUnavailable.into();
//! assert_eq!(err.code(), ErrorCode::PipelineUnavailable);
//! assert!(!err.is_startup_fatal());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::AudioError;
use crate::broadcast::error::BroadcastError;
use crate::config::ConfigError;
use crate::transcode::error::TranscodeError;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Audio capture error
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Encoder error
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// Listener-facing error
    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes
///
/// Identify a failure to HTTP clients and in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Audio
    /// The audio host could not be used
    AudioBackendUnavailable,
    /// No input device with the requested name
    AudioDeviceNotFound,
    /// The capture stream failed
    AudioStreamError,

    // Encoder
    /// The encoder could not start or exited unexpectedly
    TranscodeProcessFailed,

    // Broadcast
    /// Nothing is streaming right now
    PipelineUnavailable,
    /// A listener went away
    ClientDisconnected,
    /// The listen address could not be bound
    ServerBindFailed,
    /// The HTTP server failed
    ServerError,

    // Config
    /// Config file could not be read
    ConfigLoadFailed,
    /// Config values are invalid
    ConfigInvalid,

    // General
    /// Internal error
    InternalError,
}

/// Error context
///
/// Serialized as the body of error responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional recovery hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recovery_hint: None,
        }
    }
}

impl AppError {
    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Audio(AudioError::BackendUnavailable(_)) => ErrorCode::AudioBackendUnavailable,
            AppError::Audio(AudioError::DeviceNotFound(_)) => ErrorCode::AudioDeviceNotFound,
            AppError::Audio(_) => ErrorCode::AudioStreamError,

            AppError::Transcode(_) => ErrorCode::TranscodeProcessFailed,

            AppError::Broadcast(BroadcastError::PipelineUnavailable) => ErrorCode::PipelineUnavailable,
            AppError::Broadcast(BroadcastError::ClientDisconnected(_)) => ErrorCode::ClientDisconnected,
            AppError::Broadcast(BroadcastError::Bind { .. }) => ErrorCode::ServerBindFailed,
            AppError::Broadcast(BroadcastError::Serve(_)) => ErrorCode::ServerError,

            AppError::Config(ConfigError::Io(_)) => ErrorCode::ConfigLoadFailed,
            AppError::Config(_) => ErrorCode::ConfigInvalid,

            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the full error context
    pub fn context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new(self.code(), self.to_string());
        ctx.recovery_hint = self.recovery_hint();
        ctx
    }

    /// Get a recovery hint
    pub fn recovery_hint(&self) -> Option<String> {
        match self {
            AppError::Audio(AudioError::DeviceNotFound(_)) => {
                Some("Run with --devices to list the available input names".to_string())
            }
            AppError::Transcode(TranscodeError::TranscodeProcessFailed { code: None, .. }) => {
                Some("Check that the encoder program is installed and on PATH".to_string())
            }
            AppError::Broadcast(BroadcastError::PipelineUnavailable) => {
                Some("Retry once the audio pipeline is running again".to_string())
            }
            AppError::Broadcast(BroadcastError::Bind { .. }) => {
                Some("Pick another address with --listen".to_string())
            }
            _ => None,
        }
    }

    /// Whether this error must stop the process if it happens before serving
    pub fn is_startup_fatal(&self) -> bool {
        match self {
            AppError::Audio(e) => e.is_fatal(),
            AppError::Broadcast(BroadcastError::PipelineUnavailable)
            | AppError::Broadcast(BroadcastError::ClientDisconnected(_)) => false,
            _ => true,
        }
    }
}

/// Application result type
pub type AppResult<T> = Result<T, AppError>;
