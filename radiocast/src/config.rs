//! Application configuration
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults (`Config::default()`)
//! 2. an optional JSON file (`Config::load`)
//! 3. command-line flags (`Cli::apply_to`)
//!
//! After layering, `Config::validate` checks the result and
//! `Config::stream_config` freezes the audio settings into the immutable
//! `StreamConfig` shared by the capture and transcode stages.
//!
//! # Example
//!
//! ```
//! use radiocast_lib::config::Config;
//!
//! let mut config = Config::default();
//! config.audio.device_name = "TestMic".to_string();
//! config.validate().unwrap();
//!
//! let stream = config.stream_config().unwrap();
//! assert_eq!(stream.bytes_per_frame(), 8192 * 2 * 4);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::frame::BYTES_PER_SAMPLE;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Codec name not known to the encoder table
    #[error("Unsupported output codec: {0:?}")]
    UnsupportedCodec(String),

    /// A value is out of range or missing
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Output codec served to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCodec {
    /// AAC in an ADTS stream
    #[default]
    Aac,
    /// MP3 frames
    Mp3,
    /// Opus in Ogg pages
    Opus,
    /// Native FLAC stream
    Flac,
}

impl OutputCodec {
    /// Name passed to the encoder's `-c:a`
    pub fn encoder_name(self) -> &'static str {
        match self {
            OutputCodec::Aac => "aac",
            OutputCodec::Mp3 => "libmp3lame",
            OutputCodec::Opus => "libopus",
            OutputCodec::Flac => "flac",
        }
    }

    /// Streaming container passed to the encoder's output `-f`
    ///
    /// None of these carry a seek index, so they can be written to a pipe.
    pub fn container(self) -> &'static str {
        match self {
            OutputCodec::Aac => "adts",
            OutputCodec::Mp3 => "mp3",
            OutputCodec::Opus => "ogg",
            OutputCodec::Flac => "flac",
        }
    }

    /// Standard media type of the served stream
    pub fn media_type(self) -> &'static str {
        match self {
            OutputCodec::Aac => "audio/aac",
            OutputCodec::Mp3 => "audio/mpeg",
            OutputCodec::Opus => "audio/ogg",
            OutputCodec::Flac => "audio/flac",
        }
    }

    /// Short identifier, as accepted by `FromStr`
    pub fn as_str(self) -> &'static str {
        match self {
            OutputCodec::Aac => "aac",
            OutputCodec::Mp3 => "mp3",
            OutputCodec::Opus => "opus",
            OutputCodec::Flac => "flac",
        }
    }
}

impl FromStr for OutputCodec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aac" => Ok(OutputCodec::Aac),
            "mp3" | "libmp3lame" => Ok(OutputCodec::Mp3),
            "opus" | "libopus" => Ok(OutputCodec::Opus),
            "flac" => Ok(OutputCodec::Flac),
            _ => Err(ConfigError::UnsupportedCodec(s.to_string())),
        }
    }
}

impl fmt::Display for OutputCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audio settings shared by capture and transcode
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Capture sample rate in Hz
    pub sample_rate: f64,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per hardware read
    pub buffer_size: usize,
    /// Output codec
    pub codec: OutputCodec,
}

impl StreamConfig {
    /// Samples in one captured frame (`buffer_size × channels`)
    pub fn samples_per_frame(&self) -> usize {
        self.buffer_size * self.channels as usize
    }

    /// Serialized size of one captured frame
    pub fn bytes_per_frame(&self) -> usize {
        self.samples_per_frame() * BYTES_PER_SAMPLE
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Capture settings
    pub audio: AudioConfig,
    /// Encoder settings
    pub encoder: EncoderConfig,
    /// Pipeline plumbing
    pub pipeline: PipelineConfig,
    /// Listener fan-out
    pub broadcast: BroadcastConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:1323".to_string(),
        }
    }
}

/// Capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name, matched exactly
    pub device_name: String,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Channel count
    pub channels: u16,
    /// Frames per read
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            sample_rate: 48000.0,
            channels: 2,
            buffer_size: 8192,
        }
    }
}

/// Encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable
    pub program: String,
    /// Output codec identifier
    pub codec: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: "aac".to_string(),
        }
    }
}

/// Pipeline plumbing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunks buffered between capture and encoder
    pub raw_channel_capacity: usize,
    /// Chunks buffered between encoder and fan-out
    pub encoded_channel_capacity: usize,
    /// How long shutdown waits for the encoder to drain
    pub shutdown_grace_ms: u64,
    /// Automatic restart after a pipeline failure
    pub restart: RestartConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_channel_capacity: 8,
            encoded_channel_capacity: 64,
            shutdown_grace_ms: 5000,
            restart: RestartConfig::default(),
        }
    }
}

/// Restart policy
///
/// Disabled by default: a dead encoder leaves the server answering 503 until
/// the process is restarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Whether the pipeline restarts itself
    pub enabled: bool,
    /// Consecutive attempts before giving up (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling delay
    pub max_backoff_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Listener fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Chunks queued per listener before it is dropped as too slow
    pub client_queue_depth: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            client_queue_depth: 256,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing sections and fields keep their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check values that would make the pipeline unusable
    pub fn validate(&self) -> ConfigResult<()> {
        if self.audio.device_name.is_empty() {
            return Err(ConfigError::Invalid("device name is empty".to_string()));
        }
        if self.audio.channels == 0 {
            return Err(ConfigError::Invalid("channel count must be at least 1".to_string()));
        }
        if self.audio.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer size must be at least 1 frame".to_string()));
        }
        let frame_samples = u32::try_from(self.audio.buffer_size)
            .ok()
            .and_then(|frames| frames.checked_mul(u32::from(self.audio.channels)));
        if frame_samples.is_none() {
            return Err(ConfigError::Invalid(format!(
                "buffer size of {} frames is too large",
                self.audio.buffer_size
            )));
        }
        if !self.audio.sample_rate.is_finite() || self.audio.sample_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sample rate must be positive, got {}",
                self.audio.sample_rate
            )));
        }
        if self.pipeline.raw_channel_capacity == 0 || self.pipeline.encoded_channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be at least 1".to_string()));
        }
        if self.broadcast.client_queue_depth == 0 {
            return Err(ConfigError::Invalid("client queue depth must be at least 1".to_string()));
        }
        if self.encoder.program.is_empty() {
            return Err(ConfigError::Invalid("encoder program is empty".to_string()));
        }
        self.codec()?;
        Ok(())
    }

    /// Parsed output codec
    pub fn codec(&self) -> ConfigResult<OutputCodec> {
        self.encoder.codec.parse()
    }

    /// Freeze the audio settings
    pub fn stream_config(&self) -> ConfigResult<StreamConfig> {
        Ok(StreamConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            buffer_size: self.audio.buffer_size,
            codec: self.codec()?,
        })
    }
}
