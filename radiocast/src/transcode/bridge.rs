//! Encoder subprocess supervision
//!
//! Runs one encoder process, feeding it raw PCM from one transport channel
//! and forwarding its encoded output into another. Both directions run
//! concurrently so a full stdout pipe never deadlocks stdin, and the
//! encoder's stderr is forwarded to the log.

use std::process::{ExitStatus, Stdio};

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::transport::{ByteReceiver, ByteSender};
use crate::transcode::command::EncoderCommand;
use crate::transcode::error::{TranscodeError, TranscodeResult};

/// Size of a single read from the encoder's stdout
const READ_CHUNK: usize = 16 * 1024;

/// Counters reported when an encoder run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    /// Raw bytes written to the encoder
    pub bytes_in: u64,
    /// Encoded bytes forwarded downstream
    pub bytes_out: u64,
}

/// How the stdin feeder finished
#[derive(Debug)]
enum FeedOutcome {
    /// Upstream closed; stdin was closed so the encoder can flush
    InputEnded(u64),
    /// The encoder stopped accepting input
    EncoderClosed(u64),
}

/// How the stdout drainer finished
#[derive(Debug, Default)]
struct DrainOutcome {
    forwarded: u64,
    consumer_gone: bool,
}

/// Supervisor for one encoder process
pub struct TranscodeBridge;

impl TranscodeBridge {
    /// Spawn the encoder and start moving bytes
    ///
    /// # Arguments
    /// * `command` - Encoder invocation
    /// * `input` - Raw PCM from capture
    /// * `output` - Destination for the encoded stream; dropped on every exit
    ///   path so the fan-out sees end-of-stream
    ///
    /// # Returns
    /// A task resolving to the run's statistics. The run only counts as
    /// successful when the encoder exits with status 0 after its input ended.
    ///
    /// # Errors
    /// Returns `TranscodeError::TranscodeProcessFailed` if the process cannot
    /// be spawned.
    ///
    /// # Example
    /// ```no_run
    /// use radiocast_lib::pipeline::transport::byte_channel;
    /// use radiocast_lib::transcode::{EncoderCommand, TranscodeBridge};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let (_raw_tx, raw_rx) = byte_channel(8);
    ///     let (encoded_tx, mut encoded_rx) = byte_channel(64);
    ///
    ///     let command = EncoderCommand::new("cat", vec![]);
    ///     let task = TranscodeBridge::start(command, raw_rx, encoded_tx).unwrap();
    ///
    ///     while let Some(chunk) = encoded_rx.recv().await {
    ///         println!("Encoded {} bytes", chunk.len());
    ///     }
    ///     println!("{:?}", task.await);
    /// }
    /// ```
    pub fn start(
        command: EncoderCommand,
        input: ByteReceiver,
        output: ByteSender,
    ) -> TranscodeResult<JoinHandle<TranscodeResult<TranscodeStats>>> {
        info!("Starting encoder: {}", command);

        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TranscodeError::process_failed(
                    None,
                    format!("failed to start {}: {}", command.program(), e),
                )
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(TranscodeError::process_failed(
                None,
                "encoder pipes were not captured",
            ));
        };

        let pid = child.id();
        debug!("Encoder running with pid {:?}", pid);

        let task = tokio::spawn(async move {
            let feeder = tokio::spawn(feed_stdin(input, stdin));
            let mut drainer = tokio::spawn(drain_stdout(stdout, output));
            let diagnostics = tokio::spawn(log_stderr(stderr));
            let mut drained = None;

            let status = tokio::select! {
                status = child.wait() => status,
                outcome = &mut drainer => {
                    let outcome = outcome.unwrap_or_default();
                    if outcome.consumer_gone {
                        warn!("Encoded stream has no consumer, stopping encoder");
                        let _ = child.start_kill();
                    }
                    drained = Some(outcome);
                    child.wait().await
                }
            };

            // Nobody reads stdin anymore; stop waiting on upstream
            feeder.abort();
            let feed = feeder.await.ok();
            let bytes_out = match drained {
                Some(outcome) => outcome.forwarded,
                None => drainer.await.unwrap_or_default().forwarded,
            };
            let _ = diagnostics.await;

            let status = match status {
                Ok(status) => status,
                Err(e) => return Err(TranscodeError::Io(e)),
            };
            let stats = TranscodeStats {
                bytes_in: match &feed {
                    Some(FeedOutcome::InputEnded(n)) | Some(FeedOutcome::EncoderClosed(n)) => *n,
                    None => 0,
                },
                bytes_out,
            };

            judge_exit(status, matches!(feed, Some(FeedOutcome::InputEnded(_))), stats)
        });

        Ok(task)
    }
}

/// Decide whether an encoder exit was expected
fn judge_exit(
    status: ExitStatus,
    input_ended: bool,
    stats: TranscodeStats,
) -> TranscodeResult<TranscodeStats> {
    if status.success() && input_ended {
        info!(
            "Encoder finished: {} bytes in, {} bytes out",
            stats.bytes_in, stats.bytes_out
        );
        return Ok(stats);
    }

    let detail = if status.success() {
        "encoder exited while input was still open".to_string()
    } else {
        format!("encoder exited with {}", status)
    };
    error!("{}", detail);
    Err(TranscodeError::process_failed(status.code(), detail))
}

async fn feed_stdin(mut input: ByteReceiver, mut stdin: ChildStdin) -> FeedOutcome {
    let mut written = 0u64;

    while let Some(chunk) = input.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            warn!("Encoder stopped accepting input: {}", e);
            return FeedOutcome::EncoderClosed(written);
        }
        written += chunk.len() as u64;
    }

    debug!("Raw input ended after {} bytes, closing encoder stdin", written);
    if let Err(e) = stdin.shutdown().await {
        debug!("Closing encoder stdin: {}", e);
    }
    FeedOutcome::InputEnded(written)
}

async fn drain_stdout(mut stdout: ChildStdout, output: ByteSender) -> DrainOutcome {
    let mut outcome = DrainOutcome::default();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Reading encoder output failed: {}", e);
                break;
            }
        };

        if output.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
            outcome.consumer_gone = true;
            break;
        }
        outcome.forwarded += n as u64;
    }

    debug!("Encoder output ended after {} bytes", outcome.forwarded);
    outcome
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(target: "encoder", "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transport::byte_channel;
    use std::time::Duration;

    fn sh(script: &str) -> EncoderCommand {
        EncoderCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_passthrough_encoder_preserves_bytes() {
        let (raw_tx, raw_rx) = byte_channel(4);
        let (encoded_tx, mut encoded_rx) = byte_channel(4);

        let task = TranscodeBridge::start(EncoderCommand::new("cat", vec![]), raw_rx, encoded_tx)
            .unwrap();

        let expected: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let feed = expected.clone();
        let writer = tokio::spawn(async move {
            for chunk in feed.chunks(3000) {
                raw_tx.send(Bytes::copy_from_slice(chunk)).await.unwrap();
            }
        });

        let mut received = Vec::new();
        while let Some(chunk) = encoded_rx.recv().await {
            received.extend_from_slice(&chunk);
        }
        writer.await.unwrap();

        assert_eq!(received, expected);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.bytes_in, 100_000);
        assert_eq!(stats.bytes_out, 100_000);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_and_closes_output() {
        let (_raw_tx, raw_rx) = byte_channel(4);
        let (encoded_tx, mut encoded_rx) = byte_channel(4);

        let task = TranscodeBridge::start(sh("echo boom >&2; exit 3"), raw_rx, encoded_tx).unwrap();

        let end = tokio::time::timeout(Duration::from_secs(5), encoded_rx.recv()).await;
        assert!(matches!(end, Ok(None)), "Output should close when the encoder dies");

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_early_clean_exit_is_a_failure() {
        let (_raw_tx, raw_rx) = byte_channel(4);
        let (encoded_tx, _encoded_rx) = byte_channel(4);

        let task = TranscodeBridge::start(sh("exit 0"), raw_rx, encoded_tx).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(TranscodeError::TranscodeProcessFailed { code: Some(0), .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_encoder_fails_to_start() {
        let (_raw_tx, raw_rx) = byte_channel(4);
        let (encoded_tx, mut encoded_rx) = byte_channel(4);

        let result = TranscodeBridge::start(
            EncoderCommand::new("radiocast-no-such-encoder", vec![]),
            raw_rx,
            encoded_tx,
        );
        assert!(matches!(
            result,
            Err(TranscodeError::TranscodeProcessFailed { code: None, .. })
        ));
        assert!(encoded_rx.recv().await.is_none());
    }

    #[test]
    fn test_judge_exit() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitStatus::from_raw(0);
        let failed = ExitStatus::from_raw(2 << 8);

        assert!(judge_exit(ok, true, TranscodeStats::default()).is_ok());
        assert!(judge_exit(ok, false, TranscodeStats::default()).is_err());

        let err = judge_exit(failed, true, TranscodeStats::default()).unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
    }
}
