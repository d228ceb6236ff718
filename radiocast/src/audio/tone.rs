//! Synthetic input for running the pipeline without audio hardware.

use std::time::{Duration, Instant};

use crate::audio::capture::{FrameRead, InputOpener, SampleSource};
use crate::audio::error::{AudioError, AudioResult};
use crate::config::StreamConfig;

/// An `InputOpener` producing a sine tone
///
/// By default frames are paced at the configured sample rate, like a real
/// device. `unpaced()` produces frames as fast as downstream accepts them,
/// and `fail_after` makes the stream die with a fatal fault.
///
/// # Example
///
/// ```
/// use radiocast_lib::audio::ToneInput;
///
/// let input = ToneInput::new("TestMic", 440.0).unpaced().fail_after(10);
/// ```
#[derive(Debug, Clone)]
pub struct ToneInput {
    name: String,
    frequency: f64,
    paced: bool,
    fail_after: Option<u64>,
}

impl ToneInput {
    /// A tone at `frequency` Hz, reported under `name`
    pub fn new(name: impl Into<String>, frequency: f64) -> Self {
        Self {
            name: name.into(),
            frequency,
            paced: true,
            fail_after: None,
        }
    }

    /// Produce frames without waiting for wall-clock time
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Fail fatally after `frames` frames, as if the device were unplugged
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl InputOpener for ToneInput {
    fn describe(&self) -> String {
        format!("test tone {:?} ({} Hz)", self.name, self.frequency)
    }

    fn open(&self, config: &StreamConfig) -> AudioResult<Box<dyn SampleSource>> {
        let frame_period = if self.paced {
            Some(Duration::from_secs_f64(
                config.buffer_size as f64 / config.sample_rate,
            ))
        } else {
            None
        };

        Ok(Box::new(ToneSource {
            phase_step: self.frequency / config.sample_rate,
            phase: 0.0,
            channels: config.channels.max(1) as usize,
            frame_period,
            next_due: Instant::now(),
            remaining: self.fail_after,
        }))
    }
}

struct ToneSource {
    phase_step: f64,
    phase: f64,
    channels: usize,
    frame_period: Option<Duration>,
    next_due: Instant,
    remaining: Option<u64>,
}

impl SampleSource for ToneSource {
    fn read_frame(&mut self, frame: &mut [i32]) -> AudioResult<FrameRead> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(AudioError::fatal("test tone unplugged"));
            }
            *remaining -= 1;
        }

        if let Some(period) = self.frame_period {
            let now = Instant::now();
            if now < self.next_due {
                std::thread::sleep(self.next_due - now);
            }
            self.next_due += period;
        }

        for sample_frame in frame.chunks_mut(self.channels) {
            let value = (self.phase * std::f64::consts::TAU).sin() * 0.5;
            let sample = (value * i32::MAX as f64) as i32;
            sample_frame.fill(sample);
            self.phase = (self.phase + self.phase_step).fract();
        }

        Ok(FrameRead::Ready)
    }
}
