//! Routing actor: owns the connection registry and fans envelopes out.
//!
//! All registry mutation happens inside [`Hub::run`]. Everything else talks
//! to it through a cloneable [`HubHandle`]. Register and unregister are
//! acknowledged, so the caller resumes only once the loop has applied them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use relay_core::{ClientId, ConnectionKey, Envelope, SERVER_SENDER};
use relay_settings::HubSettings;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    HUB_DELIVERIES_TOTAL, HUB_ENVELOPES_PUBLISHED_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_EVICTIONS_TOTAL, WS_SINK_DROPS_TOTAL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

/// A connection's seat in the registry.
///
/// `queue` yields every envelope routed to this connection. It closes when the
/// connection is unregistered, evicted, or the hub stops.
#[derive(Debug)]
pub struct Registration {
    pub key: ConnectionKey,
    pub id: ClientId,
    pub queue: mpsc::Receiver<Arc<Envelope>>,
}

struct RegisterRequest {
    id: ClientId,
    reply: oneshot::Sender<Registration>,
}

struct UnregisterRequest {
    key: ConnectionKey,
    reply: oneshot::Sender<bool>,
}

struct Peer {
    id: ClientId,
    tx: mpsc::Sender<Arc<Envelope>>,
}

/// Cloneable front door to the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    publish_tx: mpsc::Sender<Envelope>,
    sink_tx: mpsc::Sender<Envelope>,
    active: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Add a connection and get its outbound queue.
    pub async fn register(&self, id: ClientId) -> Result<Registration, HubError> {
        let (reply, ack) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { id, reply })
            .await
            .map_err(|_| HubError::Closed)?;
        ack.await.map_err(|_| HubError::Closed)
    }

    /// Remove a connection, closing its queue. Returns `false` if it was already gone.
    pub async fn unregister(&self, key: ConnectionKey) -> Result<bool, HubError> {
        let (reply, ack) = oneshot::channel();
        self.unregister_tx
            .send(UnregisterRequest { key, reply })
            .await
            .map_err(|_| HubError::Closed)?;
        ack.await.map_err(|_| HubError::Closed)
    }

    /// Queue an envelope for fan-out, waiting while the publish buffer is full.
    ///
    /// A missing timestamp is set to now and an empty sender becomes `"server"`.
    pub async fn publish(&self, mut envelope: Envelope) -> Result<(), HubError> {
        envelope.stamp_time(Utc::now());
        if envelope.sender.is_empty() {
            envelope.sender = SERVER_SENDER.to_owned();
        }
        self.publish_tx
            .send(envelope)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Hand a copy of an inbound envelope to the observer. Never waits; returns
    /// `false` when the sink is full or gone and the copy was dropped.
    pub fn forward_to_sink(&self, envelope: Envelope) -> bool {
        match self.sink_tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!(WS_SINK_DROPS_TOTAL).increment(1);
                debug!("sink full, dropping envelope copy");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Receiving end of the inbound observation stream.
pub struct Sink {
    rx: mpsc::Receiver<Envelope>,
}

impl Sink {
    /// Next envelope that arrived from a client; `None` once every handle is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<Envelope> {
        ReceiverStream::new(self.rx)
    }
}

/// The routing actor.
pub struct Hub {
    registry: HashMap<ConnectionKey, Peer>,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    publish_rx: mpsc::Receiver<Envelope>,
    queue_capacity: usize,
    next_key: u64,
    active: Arc<AtomicUsize>,
}

impl Hub {
    /// Build the actor plus its handle and the sink that observes inbound traffic.
    pub fn new(settings: &HubSettings) -> (Self, HubHandle, Sink) {
        // Capacity 1 plus an ack stands in for a rendezvous channel.
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (publish_tx, publish_rx) = mpsc::channel(settings.publish_buffer.max(1));
        let (sink_tx, sink_rx) = mpsc::channel(settings.sink_buffer.max(1));
        let active = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            registry: HashMap::new(),
            register_rx,
            unregister_rx,
            publish_rx,
            queue_capacity: settings.outbound_queue_capacity.max(1),
            next_key: 0,
            active: Arc::clone(&active),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            publish_tx,
            sink_tx,
            active,
        };
        (hub, handle, Sink { rx: sink_rx })
    }

    /// Construct and spawn the loop on the current runtime.
    pub fn spawn(
        settings: &HubSettings,
        cancel: CancellationToken,
    ) -> (HubHandle, Sink, JoinHandle<()>) {
        let (hub, handle, sink) = Self::new(settings);
        let task = tokio::spawn(hub.run(cancel));
        (handle, sink, task)
    }

    /// Serve requests until cancelled or every handle is dropped.
    ///
    /// On exit every outbound queue is closed.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(queue_capacity = self.queue_capacity, "hub started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(req) = self.register_rx.recv() => self.on_register(req),
                Some(req) = self.unregister_rx.recv() => self.on_unregister(req),
                Some(envelope) = self.publish_rx.recv() => self.route(envelope),
                else => break,
            }
        }
        let dropped = self.registry.len();
        self.registry.clear();
        self.update_gauge();
        info!(dropped, "hub stopped");
    }

    fn on_register(&mut self, req: RegisterRequest) {
        self.next_key += 1;
        let key = ConnectionKey::from_raw(self.next_key);
        let (tx, queue) = mpsc::channel(self.queue_capacity);
        let registration = Registration {
            key,
            id: req.id.clone(),
            queue,
        };
        let _ = self.registry.insert(key, Peer { id: req.id.clone(), tx });
        if req.reply.send(registration).is_err() {
            // Caller went away before the ack.
            let _ = self.registry.remove(&key);
            return;
        }
        debug!(%key, client_id = %req.id, "registered");
        self.update_gauge();
    }

    fn on_unregister(&mut self, req: UnregisterRequest) {
        let removed = self.registry.remove(&req.key).is_some();
        if removed {
            debug!(key = %req.key, "unregistered");
            self.update_gauge();
        }
        let _ = req.reply.send(removed);
    }

    fn route(&mut self, envelope: Envelope) {
        counter!(HUB_ENVELOPES_PUBLISHED_TOTAL).increment(1);
        let envelope = Arc::new(envelope);
        let mut evicted = Vec::new();
        let mut delivered = 0u64;

        for (key, peer) in &self.registry {
            if !envelope.is_addressed_to(&peer.id) {
                continue;
            }
            match peer.tx.try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%key, client_id = %peer.id, "outbound queue full, evicting connection");
                    counter!(WS_EVICTIONS_TOTAL).increment(1);
                    evicted.push(*key);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(*key),
            }
        }

        counter!(HUB_DELIVERIES_TOTAL).increment(delivered);
        if !evicted.is_empty() {
            for key in evicted {
                let _ = self.registry.remove(&key);
            }
            self.update_gauge();
        }
    }

    fn update_gauge(&self) {
        let count = self.registry.len();
        self.active.store(count, Ordering::Relaxed);
        gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
    }
}
