//! HTTP listener endpoint
//!
//! `GET /` subscribes to whichever broadcaster is currently installed in the
//! hub and streams its chunks as an unbounded chunked body.

use std::borrow::Cow;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::broadcast::error::{BroadcastError, BroadcastResult};
use crate::broadcast::fanout::Broadcaster;
use crate::config::OutputCodec;
use crate::utils::error::AppError;

/// Slot holding the live broadcaster, swapped by the pipeline on restart
pub type SharedBroadcaster = Arc<ArcSwap<Broadcaster>>;

/// A hub with nothing live in it
pub fn empty_hub() -> SharedBroadcaster {
    Arc::new(ArcSwap::new(Broadcaster::closed()))
}

/// State shared by every request
#[derive(Clone)]
pub struct ServerState {
    hub: SharedBroadcaster,
    codec: OutputCodec,
}

impl ServerState {
    pub fn new(hub: SharedBroadcaster, codec: OutputCodec) -> Self {
        Self { hub, codec }
    }
}

/// Build the router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(stream_audio))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listen address
///
/// A bare `:PORT` listens on every interface.
pub async fn bind(addr: &str) -> BroadcastResult<TcpListener> {
    TcpListener::bind(listen_addr(addr).as_ref())
        .await
        .map_err(|source| BroadcastError::Bind {
            addr: addr.to_string(),
            source,
        })
}

fn listen_addr(addr: &str) -> Cow<'_, str> {
    match addr.strip_prefix(':') {
        Some(port) => Cow::Owned(format!("0.0.0.0:{}", port)),
        None => Cow::Borrowed(addr),
    }
}

/// Serve until `shutdown` is cancelled and every open stream has ended
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: CancellationToken,
) -> BroadcastResult<()> {
    let addr = listener.local_addr()?;
    info!("Serving {} on http://{}/", state.codec.media_type(), addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn stream_audio(State(state): State<ServerState>) -> Response {
    let broadcaster = state.hub.load_full();

    match broadcaster.subscribe() {
        Ok(subscription) => {
            info!(
                "Client {} connected ({} listening)",
                subscription.id(),
                broadcaster.client_count()
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, state.codec.media_type()),
                    (header::CACHE_CONTROL, "no-cache, no-store"),
                ],
                Body::from_stream(subscription),
            )
                .into_response()
        }
        Err(err) => {
            warn!("Rejecting client: {}", err);
            unavailable(err)
        }
    }
}

fn unavailable(err: BroadcastError) -> Response {
    let ctx = AppError::from(err).context();
    (StatusCode::SERVICE_UNAVAILABLE, Json(ctx)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transport::byte_channel;
    use bytes::Bytes;

    async fn start(hub: SharedBroadcaster) -> (String, CancellationToken) {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(
            listener,
            ServerState::new(hub, OutputCodec::Aac),
            shutdown.clone(),
        ));
        (format!("http://{}/", addr), shutdown)
    }

    #[tokio::test]
    async fn test_closed_hub_returns_503_json() {
        let (url, shutdown) = start(empty_hub()).await;

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "PIPELINE_UNAVAILABLE");
        assert!(body["message"].as_str().unwrap().contains("unavailable"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_live_hub_streams_with_headers() {
        let (tx, rx) = byte_channel(8);
        let (broadcaster, _distributor) = Broadcaster::spawn(rx, 16);
        let hub = empty_hub();
        hub.store(Arc::clone(&broadcaster));

        let (url, shutdown) = start(hub).await;
        let mut response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "audio/aac");
        assert_eq!(response.headers()["cache-control"], "no-cache, no-store");

        tx.send(Bytes::from_static(b"adts")).await.unwrap();
        let chunk = response.chunk().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"adts");

        drop(tx);
        assert!(response.chunk().await.unwrap().is_none());
        shutdown.cancel();
    }

    #[test]
    fn test_listen_addr_without_host() {
        assert_eq!(listen_addr(":1323"), "0.0.0.0:1323");
        assert_eq!(listen_addr("127.0.0.1:8000"), "127.0.0.1:8000");
        assert_eq!(listen_addr("[::1]:8000"), "[::1]:8000");
    }

    #[tokio::test]
    async fn test_bind_port_only() {
        let listener = bind(":0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let taken = bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = bind(&addr).await.unwrap_err();
        assert!(matches!(err, BroadcastError::Bind { .. }));
        assert!(err.to_string().contains(&addr));
    }
}
