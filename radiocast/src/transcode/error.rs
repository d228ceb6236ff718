//! Encoder subprocess error types

use thiserror::Error;

/// Transcoding errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// The encoder could not be started, or exited when it should not have
    #[error("Encoder process failed ({}): {detail}", describe_code(.code))]
    TranscodeProcessFailed {
        /// Exit code, if the process ran and exited normally
        code: Option<i32>,
        /// What went wrong
        detail: String,
    },

    /// IO error talking to the encoder
    #[error("Encoder IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

impl TranscodeError {
    /// Build a process failure
    pub fn process_failed(code: Option<i32>, detail: impl Into<String>) -> Self {
        TranscodeError::TranscodeProcessFailed {
            code,
            detail: detail.into(),
        }
    }

    /// Exit code carried by a process failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TranscodeError::TranscodeProcessFailed { code, .. } => *code,
            TranscodeError::Io(_) => None,
        }
    }
}

/// Result type for transcoding operations
pub type TranscodeResult<T> = Result<T, TranscodeError>;
