//! Fan-out of the encoded stream to independent listener queues.
//!
//! One distributor task reads the encoder output exactly once and copies
//! each chunk into a bounded queue per listener. Chunks are `Bytes`, so a
//! copy is a reference-count bump. A listener whose queue is full is
//! disconnected rather than made to skip data, and it never delays the
//! others or the encoder.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use radiocast_lib::broadcast::Broadcaster;
//! use radiocast_lib::pipeline::transport::byte_channel;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, rx) = byte_channel(8);
//!     let (broadcaster, distributor) = Broadcaster::spawn(rx, 16);
//!
//!     let mut listener = broadcaster.subscribe().unwrap();
//!     tx.send(Bytes::from_static(b"hello")).await.unwrap();
//!     assert_eq!(listener.recv().await.unwrap(), Bytes::from_static(b"hello"));
//!
//!     drop(tx);
//!     assert!(listener.recv().await.is_none());
//!     distributor.await.unwrap();
//! }
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::error::{BroadcastError, BroadcastResult};
use crate::pipeline::transport::ByteReceiver;

/// Listener identifier, unique per broadcaster
pub type ClientId = u64;

/// Counters reported when the distributor ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributorStats {
    /// Chunks read from the encoder
    pub chunks: u64,
    /// Bytes read from the encoder
    pub bytes: u64,
    /// Listeners dropped for falling behind
    pub slow_clients: u64,
}

struct Registry {
    live: bool,
    clients: HashMap<ClientId, mpsc::Sender<Bytes>>,
}

/// Shared fan-out state for one pipeline run
pub struct Broadcaster {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl Broadcaster {
    fn new(live: bool, queue_depth: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                live,
                clients: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// A broadcaster that is not fed by anything; every subscribe fails
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::new(false, 1))
    }

    /// Start the distributor reading `input`
    ///
    /// # Arguments
    /// * `input` - The encoder's output channel
    /// * `queue_depth` - Chunks buffered per listener before it is dropped
    pub fn spawn(
        input: ByteReceiver,
        queue_depth: usize,
    ) -> (Arc<Self>, JoinHandle<DistributorStats>) {
        let broadcaster = Arc::new(Self::new(true, queue_depth));
        let task = tokio::spawn(Arc::clone(&broadcaster).distribute(input));
        (broadcaster, task)
    }

    /// Register a new listener
    ///
    /// The listener receives every chunk distributed after this call.
    ///
    /// # Errors
    /// Returns `BroadcastError::PipelineUnavailable` once the encoder output
    /// has ended.
    pub fn subscribe(self: &Arc<Self>) -> BroadcastResult<Subscription> {
        let mut registry = self.registry();
        if !registry.live {
            return Err(BroadcastError::PipelineUnavailable);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_depth);
        registry.clients.insert(id, tx);

        debug!("Client {} subscribed ({} listening)", id, registry.clients.len());

        Ok(Subscription {
            id,
            rx,
            broadcaster: Arc::clone(self),
        })
    }

    /// Number of registered listeners
    pub fn client_count(&self) -> usize {
        self.registry().clients.len()
    }

    /// Whether the encoder output is still flowing
    pub fn is_live(&self) -> bool {
        self.registry().live
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unregister(&self, id: ClientId) {
        self.registry().clients.remove(&id);
    }

    /// Copy one chunk into every queue; returns how many listeners were dropped
    fn fan_out(&self, chunk: &Bytes) -> u64 {
        let mut registry = self.registry();
        let mut slow = Vec::new();
        let mut gone = Vec::new();

        for (&id, tx) in registry.clients.iter() {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => slow.push(id),
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        for id in &slow {
            warn!("Client {} fell {} chunks behind, disconnecting", id, self.queue_depth);
            registry.clients.remove(id);
        }
        for id in &gone {
            registry.clients.remove(id);
        }

        slow.len() as u64
    }

    fn close(&self) {
        let mut registry = self.registry();
        registry.live = false;
        let dropped = registry.clients.len();
        // Dropping the senders ends every listener's stream once it drains
        registry.clients.clear();
        info!("Broadcast closed, disconnected {} listeners", dropped);
    }

    async fn distribute(self: Arc<Self>, mut input: ByteReceiver) -> DistributorStats {
        let mut stats = DistributorStats::default();
        info!("Distributor started");

        while let Some(chunk) = input.recv().await {
            stats.chunks += 1;
            stats.bytes += chunk.len() as u64;
            stats.slow_clients += self.fan_out(&chunk);
        }

        self.close();
        info!(
            "Distributor finished: {} chunks, {} bytes, {} slow listeners dropped",
            stats.chunks, stats.bytes, stats.slow_clients
        );
        stats
    }
}

/// One listener's view of the broadcast
///
/// Yields chunks in order until the broadcast ends or the listener is
/// dropped for being too slow. Dropping it unregisters the listener.
pub struct Subscription {
    id: ClientId,
    rx: mpsc::Receiver<Bytes>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    /// This listener's id
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Receive the next chunk, or `None` when the stream has ended
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
        debug!("{}", BroadcastError::ClientDisconnected(self.id));
    }
}
