use crate::audio::buffer::{SampleConsumer, SampleProducer, SampleRingBuffer};
use crate::audio::device::{find_input_device, AudioDevice};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::frame::{encode_frame, f32_to_i32, i16_to_i32};
use crate::config::StreamConfig;
use crate::pipeline::transport::ByteSender;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, Stream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Frames of headroom between the audio callback and the capture thread
const RING_FRAMES: usize = 8;

/// Longest the capture thread sleeps before re-checking for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Outcome of a single read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// The frame buffer was filled
    Ready,
    /// Not enough samples yet; try again
    Pending,
}

/// A running source of interleaved i32 samples
///
/// Lives on the capture thread for its whole life, so it need not be `Send`.
pub trait SampleSource {
    /// Fill `frame` with exactly `frame.len()` samples
    ///
    /// May block for a short while waiting for the hardware. Transient
    /// faults are returned as non-fatal `StreamFault`s and the caller keeps
    /// reading; any other error ends the capture.
    fn read_frame(&mut self, frame: &mut [i32]) -> AudioResult<FrameRead>;
}

/// Something that can open a `SampleSource` for a stream configuration
pub trait InputOpener: Send + Sync + 'static {
    /// Name used in logs
    fn describe(&self) -> String;

    /// Open and start an input stream; called on the capture thread
    fn open(&self, config: &StreamConfig) -> AudioResult<Box<dyn SampleSource>>;
}

/// Counters reported when a capture run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames written downstream
    pub frames: u64,
    /// Transient faults that were logged and skipped
    pub transient_faults: u64,
}

/// Handle to a running capture thread
pub struct CaptureHandle {
    cancel: CancellationToken,
    done: Option<oneshot::Receiver<AudioResult<CaptureStats>>>,
    outcome: Option<AudioResult<CaptureStats>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Start capturing from `opener` into `output`
///
/// Spawns a dedicated thread that opens the stream, reports back, and then
/// loops: wait for a whole frame, serialize it as s32le, send it downstream
/// (blocking while `output` is full). The thread drops `output` when it
/// exits, so downstream stages see end-of-stream.
///
/// # Errors
/// Returns the opener's error if the stream cannot be opened; no thread is
/// left running in that case.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use radiocast_lib::audio::{resolve_by_name, start_capture, CpalInput};
/// use radiocast_lib::config::Config;
/// use radiocast_lib::pipeline::transport::byte_channel;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let mut config = Config::default();
///     config.audio.device_name = "TestMic".to_string();
///     let stream = Arc::new(config.stream_config().unwrap());
///
///     let device = resolve_by_name("TestMic").unwrap();
///     let (tx, mut rx) = byte_channel(8);
///     let capture = start_capture(Arc::new(CpalInput::new(device)), stream, tx, CancellationToken::new())
///         .await
///         .unwrap();
///
///     while let Some(chunk) = rx.recv().await {
///         println!("Captured {} bytes", chunk.len());
///     }
///     capture.wait().await.unwrap();
/// }
/// ```
pub async fn start_capture(
    opener: Arc<dyn InputOpener>,
    config: Arc<StreamConfig>,
    output: ByteSender,
    cancel: CancellationToken,
) -> AudioResult<CaptureHandle> {
    let (ready_tx, ready_rx) = oneshot::channel::<AudioResult<()>>();
    let (done_tx, done_rx) = oneshot::channel();
    let loop_cancel = cancel.clone();

    info!("Starting capture from {}", opener.describe());

    let thread = thread::Builder::new()
        .name("radiocast-capture".to_string())
        .spawn(move || {
            let mut source = match opener.open(&config) {
                Ok(source) => {
                    let _ = ready_tx.send(Ok(()));
                    source
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let result = run_capture_loop(
                source.as_mut(),
                config.samples_per_frame(),
                &output,
                &loop_cancel,
            );

            // Stop the hardware before announcing end-of-stream
            drop(source);
            drop(output);
            let _ = done_tx.send(result);
        })
        .map_err(|e| AudioError::StreamBuildFailed(format!("capture thread: {}", e)))?;

    match ready_rx.await {
        Ok(Ok(())) => {
            info!("Capture started");
            Ok(CaptureHandle {
                cancel,
                done: Some(done_rx),
                outcome: None,
                thread: Some(thread),
            })
        }
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(AudioError::StreamBuildFailed(
                "capture thread exited during startup".to_string(),
            ))
        }
    }
}

impl CaptureHandle {
    /// Ask the capture loop to stop after the current frame
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolve once the capture loop has ended, keeping its outcome for `wait`
    ///
    /// Cancel-safe, so it can sit in a `select!` next to other stages.
    pub async fn closed(&mut self) {
        if let Some(done) = self.done.as_mut() {
            let outcome = done.await.unwrap_or_else(|_| Err(thread_panicked()));
            self.done = None;
            self.outcome = Some(outcome);
        }
    }

    /// Wait for the capture thread to exit and return its outcome
    pub async fn wait(mut self) -> AudioResult<CaptureStats> {
        let result = match (self.outcome.take(), self.done.take()) {
            (Some(outcome), _) => outcome,
            (None, Some(done)) => done.await.unwrap_or_else(|_| Err(thread_panicked())),
            (None, None) => Err(AudioError::ChannelClosed),
        };

        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        result
    }
}

fn thread_panicked() -> AudioError {
    AudioError::fatal("capture thread panicked")
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read frames from `source` and push them into `output` until cancelled
pub fn run_capture_loop(
    source: &mut dyn SampleSource,
    samples_per_frame: usize,
    output: &ByteSender,
    cancel: &CancellationToken,
) -> AudioResult<CaptureStats> {
    let mut frame = vec![0i32; samples_per_frame];
    let mut stats = CaptureStats::default();

    debug!("Capture loop started: {} samples per frame", samples_per_frame);

    while !cancel.is_cancelled() {
        match source.read_frame(&mut frame) {
            Ok(FrameRead::Ready) => {
                if output.blocking_send(encode_frame(&frame)).is_err() {
                    warn!("Downstream closed, stopping capture");
                    return Err(AudioError::ChannelClosed);
                }
                stats.frames += 1;
            }
            Ok(FrameRead::Pending) => {}
            Err(e) if !e.is_fatal() => {
                stats.transient_faults += 1;
                warn!("{}", e);
            }
            Err(e) => {
                error!("Capture stopped: {}", e);
                return Err(e);
            }
        }
    }

    info!(
        "Capture loop finished: {} frames, {} transient faults",
        stats.frames, stats.transient_faults
    );
    Ok(stats)
}

/// Hardware input opened through cpal
pub struct CpalInput {
    device: AudioDevice,
}

impl CpalInput {
    /// Capture from a device found in the directory
    pub fn new(device: AudioDevice) -> Self {
        Self { device }
    }
}

impl InputOpener for CpalInput {
    fn describe(&self) -> String {
        format!("audio device {:?}", self.device.name)
    }

    fn open(&self, config: &StreamConfig) -> AudioResult<Box<dyn SampleSource>> {
        let device = find_input_device(&self.device.name)?;
        let source = CpalSource::open(&device, config)?;
        Ok(Box::new(source))
    }
}

/// State shared between the cpal callbacks and the capture thread
struct StreamSignals {
    reader: Thread,
    overrun_samples: AtomicU64,
    faults: Mutex<VecDeque<AudioError>>,
}

impl StreamSignals {
    fn report(&self, fault: AudioError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(fault);
        }
        self.reader.unpark();
    }

    fn next_fault(&self) -> Option<AudioError> {
        self.faults.lock().ok().and_then(|mut faults| faults.pop_front())
    }
}

/// A started cpal input stream feeding a sample ring
struct CpalSource {
    // Held for its Drop, which stops the hardware stream
    _stream: Stream,
    consumer: SampleConsumer,
    signals: Arc<StreamSignals>,
}

impl CpalSource {
    fn open(device: &cpal::Device, config: &StreamConfig) -> AudioResult<Self> {
        let sample_format = device.default_input_config()?.sample_format();
        let (producer, consumer) =
            SampleRingBuffer::for_frames(config.samples_per_frame(), RING_FRAMES);
        debug!("Sample ring holds {} samples", producer.capacity());

        let signals = Arc::new(StreamSignals {
            reader: thread::current(),
            overrun_samples: AtomicU64::new(0),
            faults: Mutex::new(VecDeque::new()),
        });

        let frames = u32::try_from(config.buffer_size).map_err(|_| {
            AudioError::StreamBuildFailed(format!(
                "buffer size of {} frames is too large",
                config.buffer_size
            ))
        })?;
        let fixed = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate.round() as u32),
            buffer_size: cpal::BufferSize::Fixed(frames),
        };

        info!(
            "Opening input stream: {} Hz, {} channels, {} frames per buffer, native format {:?}",
            fixed.sample_rate.0, fixed.channels, config.buffer_size, sample_format
        );

        let stream = match build_for_format(device, &fixed, sample_format, producer, &signals) {
            Ok(stream) => stream,
            Err(BuildFailure::Rejected(e, producer)) => {
                warn!(
                    "Device rejected a fixed buffer of {} frames ({}), using the default buffer size",
                    config.buffer_size, e
                );
                let fallback = cpal::StreamConfig {
                    buffer_size: cpal::BufferSize::Default,
                    ..fixed
                };
                build_for_format(device, &fallback, sample_format, producer, &signals)
                    .map_err(BuildFailure::into_error)?
            }
            Err(other) => return Err(other.into_error()),
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            consumer,
            signals,
        })
    }
}

impl SampleSource for CpalSource {
    fn read_frame(&mut self, frame: &mut [i32]) -> AudioResult<FrameRead> {
        if let Some(fault) = self.signals.next_fault() {
            return Err(fault);
        }

        let dropped = self.signals.overrun_samples.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            return Err(AudioError::transient(format!(
                "input overflow, {} samples dropped",
                dropped
            )));
        }

        if self.consumer.pop_frame(frame) {
            return Ok(FrameRead::Ready);
        }

        thread::park_timeout(POLL_INTERVAL);

        if self.consumer.pop_frame(frame) {
            Ok(FrameRead::Ready)
        } else {
            Ok(FrameRead::Pending)
        }
    }
}

enum BuildFailure {
    /// The configuration was refused; the producer is handed back for a retry
    Rejected(cpal::BuildStreamError, SampleProducer),
    Failed(AudioError),
}

impl BuildFailure {
    fn into_error(self) -> AudioError {
        match self {
            BuildFailure::Rejected(e, _) => AudioError::StreamBuildFailed(e.to_string()),
            BuildFailure::Failed(e) => e,
        }
    }
}

fn build_for_format(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    producer: SampleProducer,
    signals: &Arc<StreamSignals>,
) -> Result<Stream, BuildFailure> {
    match format {
        SampleFormat::I32 => build_stream::<i32>(device, config, producer, signals, |s| s),
        SampleFormat::I16 => build_stream::<i16>(device, config, producer, signals, i16_to_i32),
        SampleFormat::F32 => build_stream::<f32>(device, config, producer, signals, f32_to_i32),
        other => Err(BuildFailure::Failed(AudioError::UnsupportedSampleFormat(
            format!("{:?}", other),
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    producer: SampleProducer,
    signals: &Arc<StreamSignals>,
    convert: fn(T) -> i32,
) -> Result<Stream, BuildFailure>
where
    T: SizedSample + Send + 'static,
{
    // The producer moves into the callback; keep a way to get it back if the
    // backend refuses the configuration before the callback ever exists.
    let slot = Arc::new(Mutex::new(Some(producer)));
    let callback_slot = Arc::clone(&slot);
    let data_signals = Arc::clone(signals);
    let error_signals = Arc::clone(signals);
    let mut scratch: Vec<i32> = Vec::new();
    let mut producer: Option<SampleProducer> = None;

    let result = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if producer.is_none() {
                producer = callback_slot.lock().ok().and_then(|mut p| p.take());
            }
            let Some(producer) = producer.as_mut() else {
                return;
            };

            scratch.clear();
            scratch.extend(data.iter().map(|&s| convert(s)));

            let written = producer.push_slice(&scratch);
            if written < scratch.len() {
                data_signals
                    .overrun_samples
                    .fetch_add((scratch.len() - written) as u64, Ordering::Relaxed);
            }
            data_signals.reader.unpark();
        },
        move |err| {
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                error!("Audio device disconnected");
                error_signals.report(AudioError::fatal(err.to_string()));
            } else {
                error_signals.report(AudioError::transient(err.to_string()));
            }
        },
        None,
    );

    match result {
        Ok(stream) => Ok(stream),
        Err(e @ cpal::BuildStreamError::StreamConfigNotSupported)
        | Err(e @ cpal::BuildStreamError::InvalidArgument) => {
            match slot.lock().ok().and_then(|mut p| p.take()) {
                Some(producer) => Err(BuildFailure::Rejected(e, producer)),
                None => Err(BuildFailure::Failed(AudioError::StreamBuildFailed(e.to_string()))),
            }
        }
        Err(e) => Err(BuildFailure::Failed(AudioError::StreamBuildFailed(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transport::byte_channel;

    /// Yields a scripted sequence of reads, then fails fatally
    struct Scripted {
        steps: VecDeque<AudioResult<FrameRead>>,
        next_sample: i32,
    }

    impl Scripted {
        fn new(steps: Vec<AudioResult<FrameRead>>) -> Self {
            Self {
                steps: steps.into(),
                next_sample: 0,
            }
        }
    }

    impl SampleSource for Scripted {
        fn read_frame(&mut self, frame: &mut [i32]) -> AudioResult<FrameRead> {
            match self.steps.pop_front() {
                Some(Ok(FrameRead::Ready)) => {
                    for s in frame.iter_mut() {
                        *s = self.next_sample;
                        self.next_sample += 1;
                    }
                    Ok(FrameRead::Ready)
                }
                Some(other) => other,
                None => Err(AudioError::fatal("script exhausted")),
            }
        }
    }

    fn drain(rx: &mut crate::pipeline::transport::ByteReceiver) -> Vec<u8> {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let mut out = Vec::new();
            while let Some(chunk) = rx.recv().await {
                out.extend_from_slice(&chunk);
            }
            out
        })
    }

    #[test]
    fn test_loop_serializes_frames_in_order() {
        let (tx, mut rx) = byte_channel(16);
        let mut source = Scripted::new(vec![
            Ok(FrameRead::Ready),
            Ok(FrameRead::Pending),
            Ok(FrameRead::Ready),
        ]);

        let result = run_capture_loop(&mut source, 4, &tx, &CancellationToken::new());
        assert!(matches!(result, Err(AudioError::StreamFault { fatal: true, .. })));
        drop(tx);

        let bytes = drain(&mut rx);
        assert_eq!(bytes.len(), 2 * 4 * 4);
        let samples: Vec<i32> = bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(samples, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_loop_survives_transient_faults() {
        let (tx, mut rx) = byte_channel(16);
        let mut source = Scripted::new(vec![
            Ok(FrameRead::Ready),
            Err(AudioError::transient("xrun")),
            Err(AudioError::transient("xrun")),
            Ok(FrameRead::Ready),
        ]);

        let result = run_capture_loop(&mut source, 2, &tx, &CancellationToken::new());
        assert!(result.is_err(), "Script ends with a fatal fault");
        drop(tx);

        assert_eq!(drain(&mut rx).len(), 2 * 2 * 4);
    }

    #[test]
    fn test_loop_stops_when_cancelled() {
        let (tx, _rx) = byte_channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = Scripted::new(vec![]);

        let stats = run_capture_loop(&mut source, 2, &tx, &cancel).unwrap();
        assert_eq!(stats, CaptureStats::default());
    }

    #[test]
    fn test_loop_stops_when_downstream_closes() {
        let (tx, rx) = byte_channel(16);
        drop(rx);
        let mut source = Scripted::new(vec![Ok(FrameRead::Ready)]);

        let result = run_capture_loop(&mut source, 2, &tx, &CancellationToken::new());
        assert!(matches!(result, Err(AudioError::ChannelClosed)));
    }

    struct FailingOpener;

    impl InputOpener for FailingOpener {
        fn describe(&self) -> String {
            "failing input".to_string()
        }

        fn open(&self, _config: &StreamConfig) -> AudioResult<Box<dyn SampleSource>> {
            Err(AudioError::DeviceNotFound("Missing".to_string()))
        }
    }

    #[tokio::test]
    async fn test_start_capture_reports_open_failure() {
        let config = Arc::new(StreamConfig {
            sample_rate: 48000.0,
            channels: 2,
            buffer_size: 64,
            codec: crate::config::OutputCodec::Aac,
        });
        let (tx, mut rx) = byte_channel(4);

        let result = start_capture(Arc::new(FailingOpener), config, tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));

        // The sender died with the thread, so downstream sees end-of-stream
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_keeps_outcome_for_wait() {
        let config = Arc::new(StreamConfig {
            sample_rate: 48000.0,
            channels: 2,
            buffer_size: 16,
            codec: crate::config::OutputCodec::Aac,
        });
        let (tx, mut rx) = byte_channel(16);
        let tone = crate::audio::tone::ToneInput::new("TestMic", 440.0)
            .unpaced()
            .fail_after(3);

        let mut capture = start_capture(Arc::new(tone), config, tx, CancellationToken::new())
            .await
            .unwrap();
        capture.closed().await;
        // A second call returns immediately
        capture.closed().await;

        let result = capture.wait().await;
        assert!(matches!(result, Err(AudioError::StreamFault { fatal: true, .. })));

        let mut frames = 0;
        while rx.recv().await.is_some() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }
}
