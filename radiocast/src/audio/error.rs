use thiserror::Error;

/// Audio-related errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// The host audio subsystem could not be initialized or queried
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No input device matches the requested name
    #[error("No audio input device named {0:?}")]
    DeviceNotFound(String),

    /// Hardware stream error, either transient (a glitch) or fatal (device gone)
    #[error("Audio stream fault ({}): {detail}", fault_kind(.fatal))]
    StreamFault {
        /// Whether the stream can no longer deliver samples
        fatal: bool,
        /// Backend description of the fault
        detail: String,
    },

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    /// The device only offers a sample format we cannot frame as s32le
    #[error("Unsupported device sample format: {0}")]
    UnsupportedSampleFormat(String),

    /// The downstream transport channel was closed
    #[error("Downstream channel closed")]
    ChannelClosed,
}

fn fault_kind(fatal: &bool) -> &'static str {
    if *fatal { "fatal" } else { "transient" }
}

impl AudioError {
    /// Build a transient stream fault
    pub fn transient(detail: impl Into<String>) -> Self {
        AudioError::StreamFault {
            fatal: false,
            detail: detail.into(),
        }
    }

    /// Build a fatal stream fault
    pub fn fatal(detail: impl Into<String>) -> Self {
        AudioError::StreamFault {
            fatal: true,
            detail: detail.into(),
        }
    }

    /// Whether this error ends the capture loop
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AudioError::StreamFault { fatal: false, .. })
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::BackendUnavailable(err.to_string())
    }
}

impl From<cpal::HostUnavailable> for AudioError {
    fn from(err: cpal::HostUnavailable) -> Self {
        AudioError::BackendUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::StreamBuildFailed(err.to_string())
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
