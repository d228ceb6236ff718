//! Command-line interface
//!
//! Flags override the values loaded from `--config`, which in turn override
//! the built-in defaults. The legacy spellings (`--port`, `--bufSize`,
//! `--sr`, `--chans`, `--of`) are accepted as aliases.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;

use crate::audio::AudioDevice;
use crate::config::Config;

/// Capture an audio input and stream it to HTTP listeners
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "radiocast", version, about)]
pub struct Cli {
    /// Listen address
    #[arg(long, visible_alias = "port", value_name = "ADDR")]
    pub listen: Option<String>,

    /// List input device names, one per line, and exit
    #[arg(long)]
    pub devices: bool,

    /// Input device name (exact, case-sensitive)
    #[arg(long)]
    pub name: Option<String>,

    /// Frames per capture read
    #[arg(long = "buf-size", visible_alias = "bufSize", value_name = "FRAMES")]
    pub buffer_size: Option<usize>,

    /// Sample rate in Hz
    #[arg(long, visible_alias = "sr", value_name = "HZ")]
    pub sample_rate: Option<f64>,

    /// Channel count
    #[arg(long, visible_alias = "chans")]
    pub channels: Option<u16>,

    /// Output codec (aac, mp3, opus, flac)
    #[arg(long, visible_alias = "of")]
    pub codec: Option<String>,

    /// Encoder executable
    #[arg(long, value_name = "PROGRAM")]
    pub encoder: Option<String>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Restart the pipeline automatically after a failure
    #[arg(long)]
    pub restart: bool,
}

impl Cli {
    /// Layer the flags that were given on top of `config`
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(name) = &self.name {
            config.audio.device_name = name.clone();
        }
        if let Some(buffer_size) = self.buffer_size {
            config.audio.buffer_size = buffer_size;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.audio.sample_rate = sample_rate;
        }
        if let Some(channels) = self.channels {
            config.audio.channels = channels;
        }
        if let Some(codec) = &self.codec {
            config.encoder.codec = codec.clone();
        }
        if let Some(encoder) = &self.encoder {
            config.encoder.program = encoder.clone();
        }
        if self.restart {
            config.pipeline.restart.enabled = true;
        }
    }

    /// Build the effective configuration: defaults, then `--config`, then flags
    pub fn load_config(&self) -> crate::config::ConfigResult<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }
}

/// Print device names, one per line
///
/// Prints nothing for an empty list.
pub fn print_devices<W: Write>(out: &mut W, devices: &[AudioDevice]) -> io::Result<()> {
    for device in devices {
        writeln!(out, "{}", device.name)?;
    }
    out.flush()
}
