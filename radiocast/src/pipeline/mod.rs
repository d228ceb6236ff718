//! Pipeline context
//!
//! Wires capture, the encoder bridge and the listener fan-out together and
//! supervises them. There are no process-wide globals: everything a run
//! needs lives in `Pipeline`, and the HTTP server only sees the hub.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use radiocast_lib::audio::ToneInput;
//! use radiocast_lib::config::Config;
//! use radiocast_lib::pipeline::{Pipeline, PipelineOptions};
//! use radiocast_lib::transcode::EncoderCommand;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = Config::default();
//!     config.audio.device_name = "TestMic".to_string();
//!     let stream = Arc::new(config.stream_config().unwrap());
//!
//!     let mut pipeline = Pipeline::new(
//!         Arc::new(ToneInput::new("TestMic", 440.0)),
//!         Arc::clone(&stream),
//!         EncoderCommand::ffmpeg("ffmpeg", &stream),
//!         PipelineOptions::from_config(&config),
//!     );
//!     pipeline.start().await.unwrap();
//!
//!     let hub = pipeline.hub();
//!     println!("{} listeners", hub.load().client_count());
//!
//!     pipeline.shutdown().await;
//! }
//! ```
//!
//! # Workflow
//!
//! ```text
//! 1. start()
//!    └── Status: Stopped -> Starting
//!    └── bridge, then fan-out, then capture
//!    └── Status: Starting -> Running, broadcaster swapped into the hub
//!
//! 2. a stage dies (encoder exits, device unplugged)
//!    └── Status: Running -> Failed, hub holds a closed broadcaster (503)
//!
//! 3. restart enabled
//!    └── Status: Failed -> Restarting, wait with doubling back-off
//!    └── Status: Restarting -> Running, fresh broadcaster (200 again)
//!
//! 4. shutdown()
//!    └── capture, then encoder drain, then listeners
//!    └── Status: -> Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audio::InputOpener;
use crate::broadcast::{empty_hub, Broadcaster, SharedBroadcaster};
use crate::config::{Config, StreamConfig};
use crate::transcode::EncoderCommand;
use crate::utils::error::{AppError, AppResult};

/// Restart back-off policy
pub mod restart;

/// One generation of capture, bridge and fan-out
mod run;

/// Byte channels between stages
pub mod transport;

// Re-export commonly used types
pub use restart::RestartPolicy;

use run::{Blueprint, Run};

/// Pipeline lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Stages are being launched
    Starting,
    /// Audio is flowing
    Running,
    /// Waiting to relaunch after a failure
    Restarting,
    /// A stage died and no restart is pending
    Failed,
    /// Not started, or shut down
    Stopped,
}

/// Tuning knobs for a pipeline
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Chunks buffered between capture and encoder
    pub raw_channel_capacity: usize,
    /// Chunks buffered between encoder and fan-out
    pub encoded_channel_capacity: usize,
    /// Chunks buffered per listener
    pub client_queue_depth: usize,
    /// How long shutdown waits for the encoder to drain
    pub shutdown_grace: Duration,
    /// Restart policy
    pub restart: RestartPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            raw_channel_capacity: config.pipeline.raw_channel_capacity,
            encoded_channel_capacity: config.pipeline.encoded_channel_capacity,
            client_queue_depth: config.broadcast.client_queue_depth,
            shutdown_grace: Duration::from_millis(config.pipeline.shutdown_grace_ms),
            restart: RestartPolicy::from(&config.pipeline.restart),
        }
    }
}

struct Shared {
    blueprint: Blueprint,
    hub: SharedBroadcaster,
    status: watch::Sender<PipelineStatus>,
}

impl Shared {
    fn set_status(&self, status: PipelineStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!("Pipeline status: {:?} -> {:?}", previous, status);
        }
    }
}

/// Capture → encoder → fan-out, with a supervisor
pub struct Pipeline {
    shared: Arc<Shared>,
    stop: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Create a stopped pipeline
    ///
    /// # Arguments
    /// * `opener` - Audio input, opened on the capture thread
    /// * `config` - Immutable stream parameters shared by every stage
    /// * `command` - Encoder invocation
    /// * `options` - Channel sizes, grace period and restart policy
    pub fn new(
        opener: Arc<dyn InputOpener>,
        config: Arc<StreamConfig>,
        command: EncoderCommand,
        options: PipelineOptions,
    ) -> Self {
        let (status, _) = watch::channel(PipelineStatus::Stopped);
        Self {
            shared: Arc::new(Shared {
                blueprint: Blueprint {
                    opener,
                    config,
                    command,
                    options,
                },
                hub: empty_hub(),
                status,
            }),
            stop: CancellationToken::new(),
            supervisor: None,
        }
    }

    /// The slot the HTTP server reads the live broadcaster from
    pub fn hub(&self) -> SharedBroadcaster {
        Arc::clone(&self.shared.hub)
    }

    /// Current status
    pub fn status(&self) -> PipelineStatus {
        *self.shared.status.borrow()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<PipelineStatus> {
        self.shared.status.subscribe()
    }

    /// Launch every stage and begin supervising them
    ///
    /// # Errors
    /// Device open and encoder spawn failures are returned; nothing is left
    /// running in that case.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.supervisor.is_some() {
            return Err(AppError::Internal("pipeline already started".to_string()));
        }

        if self.stop.is_cancelled() {
            self.stop = CancellationToken::new();
        }

        self.shared.set_status(PipelineStatus::Starting);
        let run = match Run::launch(&self.shared.blueprint).await {
            Ok(run) => run,
            Err(e) => {
                error!("Pipeline failed to start: {}", e);
                self.shared.set_status(PipelineStatus::Failed);
                return Err(e);
            }
        };

        self.shared.hub.store(run.broadcaster());
        self.shared.set_status(PipelineStatus::Running);

        self.supervisor = Some(tokio::spawn(supervise(
            Arc::clone(&self.shared),
            run,
            self.stop.clone(),
        )));
        Ok(())
    }

    /// Stop every stage in order and wait for them
    pub async fn shutdown(&mut self) {
        info!("Shutting down pipeline");
        self.stop.cancel();

        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                error!("Pipeline supervisor failed: {}", e);
            }
        }

        self.shared.hub.store(Broadcaster::closed());
        self.shared.set_status(PipelineStatus::Stopped);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn supervise(shared: Arc<Shared>, mut run: Run, stop: CancellationToken) {
    let options = &shared.blueprint.options;

    loop {
        let exit = tokio::select! {
            _ = stop.cancelled() => None,
            exit = run.stage_exit() => Some(exit),
        };
        let Some(exit) = exit else {
            run.shutdown(options.shutdown_grace).await.log_summary();
            return;
        };

        // New listeners get 503 from here on
        shared.hub.store(Broadcaster::closed());
        let report = run.shutdown(options.shutdown_grace).await;
        report.log_summary();
        let reason = report
            .failure()
            .unwrap_or_else(|| format!("{:?} stage ended unexpectedly", exit));
        error!("Pipeline failed: {}", reason);
        shared.set_status(PipelineStatus::Failed);

        run = match relaunch(&shared, &stop).await {
            Some(run) => run,
            None => return,
        };
    }
}

/// Relaunch with back-off until it works, the policy gives up, or shutdown
async fn relaunch(shared: &Shared, stop: &CancellationToken) -> Option<Run> {
    let policy = shared.blueprint.options.restart;
    let mut attempt = 1;

    while policy.allows(attempt) {
        let delay = policy.backoff(attempt);
        shared.set_status(PipelineStatus::Restarting);
        info!("Restarting pipeline in {:?} (attempt {})", delay, attempt);

        tokio::select! {
            _ = stop.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match Run::launch(&shared.blueprint).await {
            Ok(run) => {
                shared.hub.store(run.broadcaster());
                shared.set_status(PipelineStatus::Running);
                info!("Pipeline restarted after {} attempt(s)", attempt);
                return Some(run);
            }
            Err(e) => {
                warn!("Restart attempt {} failed: {}", attempt, e);
                attempt += 1;
            }
        }
    }

    if policy.enabled {
        error!("Giving up after {} restart attempts", attempt - 1);
    }
    shared.set_status(PipelineStatus::Failed);
    None
}
