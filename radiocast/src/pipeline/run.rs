//! One generation of the pipeline
//!
//! A `Run` owns the capture thread, the encoder bridge and the distributor
//! wired together by two fresh transport channels. A restart throws the
//! whole run away and launches a new one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{start_capture, AudioError, CaptureHandle, CaptureStats, InputOpener};
use crate::broadcast::{Broadcaster, DistributorStats};
use crate::config::StreamConfig;
use crate::pipeline::transport::byte_channel;
use crate::pipeline::PipelineOptions;
use crate::transcode::{EncoderCommand, TranscodeBridge, TranscodeResult, TranscodeStats};
use crate::utils::error::AppResult;

type BridgeTask = JoinHandle<TranscodeResult<TranscodeStats>>;

/// Everything needed to launch a run
pub(crate) struct Blueprint {
    pub opener: Arc<dyn InputOpener>,
    pub config: Arc<StreamConfig>,
    pub command: EncoderCommand,
    pub options: PipelineOptions,
}

/// Which stage ended first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageExit {
    Capture,
    Bridge,
}

/// A running capture, bridge and distributor
pub(crate) struct Run {
    broadcaster: Arc<Broadcaster>,
    capture: CaptureHandle,
    bridge: BridgeTask,
    bridge_result: Option<Result<TranscodeResult<TranscodeStats>, JoinError>>,
    distributor: JoinHandle<DistributorStats>,
}

/// How each stage of a run ended
#[derive(Debug)]
pub(crate) struct RunReport {
    pub capture: Result<CaptureStats, AudioError>,
    pub bridge: Option<TranscodeResult<TranscodeStats>>,
    pub distributor: Option<DistributorStats>,
}

impl RunReport {
    /// First real failure, ignoring the knock-on effects of another stage dying
    pub fn failure(&self) -> Option<String> {
        if let Some(Err(e)) = &self.bridge {
            return Some(e.to_string());
        }
        match &self.capture {
            Err(AudioError::ChannelClosed) | Ok(_) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    /// Log what the fan-out delivered during the run
    pub fn log_summary(&self) {
        if let Some(stats) = &self.distributor {
            info!(
                "Distributed {} chunks ({} bytes), dropped {} slow listener(s)",
                stats.chunks, stats.bytes, stats.slow_clients
            );
        }
    }
}

impl Run {
    /// Start the bridge, then the fan-out, then capture
    ///
    /// On error every stage that did start is wound down before returning.
    pub async fn launch(blueprint: &Blueprint) -> AppResult<Self> {
        let options = &blueprint.options;
        let (raw_tx, raw_rx) = byte_channel(options.raw_channel_capacity);
        let (encoded_tx, encoded_rx) = byte_channel(options.encoded_channel_capacity);

        let mut bridge = TranscodeBridge::start(blueprint.command.clone(), raw_rx, encoded_tx)?;
        let (broadcaster, distributor) =
            Broadcaster::spawn(encoded_rx, options.client_queue_depth);

        let capture = match start_capture(
            Arc::clone(&blueprint.opener),
            Arc::clone(&blueprint.config),
            raw_tx,
            CancellationToken::new(),
        )
        .await
        {
            Ok(capture) => capture,
            Err(e) => {
                // raw_tx is gone, so the encoder sees end of input
                finish_bridge(&mut bridge, options.shutdown_grace).await;
                let _ = distributor.await;
                return Err(e.into());
            }
        };

        Ok(Self {
            broadcaster,
            capture,
            bridge,
            bridge_result: None,
            distributor,
        })
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Wait for the first stage to end on its own
    ///
    /// Cancel-safe.
    pub async fn stage_exit(&mut self) -> StageExit {
        if self.bridge_result.is_some() {
            return StageExit::Bridge;
        }

        tokio::select! {
            _ = self.capture.closed() => StageExit::Capture,
            result = &mut self.bridge => {
                self.bridge_result = Some(result);
                StageExit::Bridge
            }
        }
    }

    /// Stop the run in pipeline order
    ///
    /// 1. stop capture and join its thread, which closes the raw channel
    /// 2. let the encoder drain within `grace`, then abort it
    /// 3. wait for the distributor to close every listener
    pub async fn shutdown(mut self, grace: Duration) -> RunReport {
        self.capture.stop();
        let capture = self.capture.wait().await;
        debug!("Capture joined: {:?}", capture);

        let bridge = match self.bridge_result.take() {
            Some(result) => Some(result),
            None => finish_bridge(&mut self.bridge, grace).await,
        };
        let bridge = match bridge {
            Some(Ok(result)) => Some(result),
            Some(Err(e)) => {
                error!("Encoder task failed: {}", e);
                None
            }
            None => None,
        };

        let distributor = match tokio::time::timeout(grace, &mut self.distributor).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!("Distributor task failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Distributor did not finish within {:?}, aborting", grace);
                self.distributor.abort();
                None
            }
        };

        info!("Pipeline run stopped");
        RunReport {
            capture,
            bridge,
            distributor,
        }
    }
}

/// Wait up to `grace` for the bridge, aborting it (and killing the encoder)
/// after that
async fn finish_bridge(
    bridge: &mut BridgeTask,
    grace: Duration,
) -> Option<Result<TranscodeResult<TranscodeStats>, JoinError>> {
    match tokio::time::timeout(grace, &mut *bridge).await {
        Ok(result) => Some(result),
        Err(_) => {
            warn!("Encoder did not drain within {:?}, killing it", grace);
            bridge.abort();
            let _ = bridge.await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ToneInput;
    use crate::config::OutputCodec;

    fn blueprint() -> Blueprint {
        Blueprint {
            opener: Arc::new(ToneInput::new("TestMic", 440.0)),
            config: Arc::new(StreamConfig {
                sample_rate: 48000.0,
                channels: 2,
                buffer_size: 256,
                codec: OutputCodec::Aac,
            }),
            command: EncoderCommand::new("cat", vec![]),
            options: PipelineOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_reports_distributor_stats() {
        let run = Run::launch(&blueprint()).await.unwrap();

        let mut listener = run.broadcaster().subscribe().unwrap();
        let chunk = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!chunk.is_empty());

        let report = run.shutdown(Duration::from_secs(2)).await;
        assert!(report.failure().is_none(), "Clean stop: {:?}", report);

        let stats = report.distributor.expect("Distributor should finish in time");
        assert!(stats.chunks > 0);
        assert!(stats.bytes >= chunk.len() as u64);
        report.log_summary();
    }
}
