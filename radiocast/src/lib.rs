//! radiocast: live audio capture relayed to HTTP listeners
//!
//! ```text
//! input device ──s32le──▶ encoder process ──encoded──▶ fan-out ──▶ GET / listeners
//!   (capture)    raw ch.    (transcode)     encoded ch. (broadcast)
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Audio processing modules
pub mod audio;

/// Listener fan-out and HTTP endpoint
pub mod broadcast;

/// Command-line interface
pub mod cli;

/// Configuration
pub mod config;

/// Pipeline context and supervision
pub mod pipeline;

/// Encoder subprocess bridge
pub mod transcode;

/// Utility modules
pub mod utils;

use audio::{list_input_devices, resolve_by_name, CpalInput};
use broadcast::server::{self, ServerState};
use cli::{print_devices, Cli};
use config::OutputCodec;
use pipeline::{Pipeline, PipelineOptions};
use transcode::EncoderCommand;

/// Run the program for parsed command-line arguments
///
/// In listing mode prints the input device names and returns. Otherwise
/// validates the configuration, opens the device, starts the pipeline,
/// binds the listen address and serves until Ctrl-C.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.devices {
        let devices = list_input_devices().context("Failed to list input devices")?;
        print_devices(&mut std::io::stdout().lock(), &devices)?;
        return Ok(());
    }

    let config = cli.load_config().context("Failed to load configuration")?;
    config.validate()?;
    let stream = Arc::new(config.stream_config()?);

    let device = resolve_by_name(&config.audio.device_name)?;
    info!(
        "Using input {:?}: {} Hz, {} channels, {} frames per read, {}",
        device.name, stream.sample_rate, stream.channels, stream.buffer_size, stream.codec
    );

    let mut pipeline = Pipeline::new(
        Arc::new(CpalInput::new(device)),
        Arc::clone(&stream),
        EncoderCommand::ffmpeg(&config.encoder.program, &stream),
        PipelineOptions::from_config(&config),
    );
    pipeline.start().await?;

    let listener = match server::bind(&config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            pipeline.shutdown().await;
            return Err(e.into());
        }
    };

    serve_until(pipeline, listener, stream.codec, shutdown_signal()).await
}

/// Serve a started pipeline on `listener` until `shutdown` resolves
///
/// Shuts the pipeline down first, which ends every open listener stream,
/// then lets the HTTP server finish.
pub async fn serve_until(
    mut pipeline: Pipeline,
    listener: TcpListener,
    codec: OutputCodec,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let server_stop = CancellationToken::new();
    let mut server = tokio::spawn(server::serve(
        listener,
        ServerState::new(pipeline.hub(), codec),
        server_stop.clone(),
    ));

    let early_exit = tokio::select! {
        _ = shutdown => None,
        result = &mut server => Some(result),
    };

    info!("Stopping");
    pipeline.shutdown().await;
    server_stop.cancel();

    let result = match early_exit {
        Some(result) => result,
        None => server.await,
    };
    result.context("HTTP server task failed")??;

    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
