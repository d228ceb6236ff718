//! Encoder command lines
//!
//! Builds the argument vector for the external encoder from the shared
//! `StreamConfig`.

use std::fmt;

use tracing::warn;

use crate::config::StreamConfig;

/// Sample rate handed to the encoder when the capture rate is not one it is
/// configured for
pub const DEFAULT_ENCODER_SAMPLE_RATE: &str = "48k";

/// An external encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    program: String,
    args: Vec<String>,
}

impl EncoderCommand {
    /// Any program with explicit arguments
    ///
    /// The program must read raw PCM on stdin and write the encoded stream
    /// to stdout.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// An ffmpeg invocation encoding s32le PCM from stdin into the
    /// configured codec on stdout
    ///
    /// # Example
    /// ```
    /// use radiocast_lib::config::{OutputCodec, StreamConfig};
    /// use radiocast_lib::transcode::EncoderCommand;
    ///
    /// let config = StreamConfig {
    ///     sample_rate: 48000.0,
    ///     channels: 2,
    ///     buffer_size: 8192,
    ///     codec: OutputCodec::Aac,
    /// };
    /// let command = EncoderCommand::ffmpeg("ffmpeg", &config);
    /// assert_eq!(command.to_string(), "ffmpeg -v error -f s32le -ac 2 -ar 48k -i - -c:a aac -ar 48k -ac 2 -f adts -");
    /// ```
    pub fn ffmpeg(program: impl Into<String>, config: &StreamConfig) -> Self {
        let rate = encoder_sample_rate(config.sample_rate);
        let channels = config.channels.to_string();

        let args = [
            "-v",
            "error",
            "-f",
            "s32le",
            "-ac",
            channels.as_str(),
            "-ar",
            rate,
            "-i",
            "-",
            "-c:a",
            config.codec.encoder_name(),
            "-ar",
            rate,
            "-ac",
            channels.as_str(),
            "-f",
            config.codec.container(),
            "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self::new(program, args)
    }

    /// Executable name or path
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, without the program
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Map a capture sample rate onto one of the encoder's configured rates
///
/// Only 16 kHz and 48 kHz are passed through; anything else falls back to
/// `DEFAULT_ENCODER_SAMPLE_RATE`.
pub fn encoder_sample_rate(sample_rate: f64) -> &'static str {
    if sample_rate == 16000.0 {
        "16k"
    } else if sample_rate == 48000.0 {
        "48k"
    } else {
        warn!(
            "Sample rate {} Hz is not supported by the encoder setup, using {}",
            sample_rate, DEFAULT_ENCODER_SAMPLE_RATE
        );
        DEFAULT_ENCODER_SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputCodec;

    fn config(sample_rate: f64, channels: u16, codec: OutputCodec) -> StreamConfig {
        StreamConfig {
            sample_rate,
            channels,
            buffer_size: 8192,
            codec,
        }
    }

    #[test]
    fn test_supported_sample_rates() {
        assert_eq!(encoder_sample_rate(16000.0), "16k");
        assert_eq!(encoder_sample_rate(48000.0), "48k");
    }

    #[test]
    fn test_unsupported_sample_rates_fall_back() {
        for rate in [8000.0, 22050.0, 44100.0, 96000.0, 0.0] {
            assert_eq!(encoder_sample_rate(rate), DEFAULT_ENCODER_SAMPLE_RATE);
        }
    }

    #[test]
    fn test_ffmpeg_arguments() {
        let command = EncoderCommand::ffmpeg("ffmpeg", &config(16000.0, 1, OutputCodec::Aac));
        assert_eq!(command.program(), "ffmpeg");
        assert_eq!(
            command.args(),
            [
                "-v", "error", "-f", "s32le", "-ac", "1", "-ar", "16k", "-i", "-", "-c:a", "aac",
                "-ar", "16k", "-ac", "1", "-f", "adts", "-"
            ]
        );
    }

    #[test]
    fn test_ffmpeg_arguments_follow_codec() {
        let command = EncoderCommand::ffmpeg("/usr/bin/ffmpeg", &config(44100.0, 2, OutputCodec::Opus));
        let line = command.to_string();
        assert!(line.starts_with("/usr/bin/ffmpeg "));
        assert!(line.contains("-c:a libopus"));
        assert!(line.contains("-f ogg -"));
        assert!(line.contains("-ar 48k"), "44.1 kHz falls back to the default");
    }
}
