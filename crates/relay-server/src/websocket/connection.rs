//! One client session: a read pump relaying inbound envelopes to the hub and
//! a write pump draining the connection's queue to the socket.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use relay_core::{ClientId, ConnectionKey, Envelope};
use relay_settings::HubSettings;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::hub::HubHandle;
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Per-connection limits and timers.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub max_frame_bytes: usize,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
}

impl From<&HubSettings> for ConnectionConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            max_frame_bytes: settings.max_frame_bytes,
            read_timeout: settings.read_timeout(),
            ping_interval: settings.ping_interval(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

/// Why a read pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Peer sent a close frame or the stream ended.
    Closed,
    /// No frame or pong within the read deadline.
    Timeout,
    /// A frame that is not a valid envelope.
    Decode(String),
    /// A frame larger than the configured limit.
    Oversize(usize),
    Transport(String),
    Shutdown,
    HubClosed,
}

impl Display for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed by peer"),
            Self::Timeout => f.write_str("read deadline exceeded"),
            Self::Decode(e) => write!(f, "malformed envelope: {e}"),
            Self::Oversize(len) => write!(f, "frame of {len} bytes exceeds limit"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Shutdown => f.write_str("server shutting down"),
            Self::HubClosed => f.write_str("hub stopped"),
        }
    }
}

/// Run a registered session on an upgraded socket until either side ends it.
#[instrument(skip_all, fields(client_id = %id))]
pub async fn serve_connection(
    socket: WebSocket,
    id: ClientId,
    hub: HubHandle,
    config: ConnectionConfig,
    cancel: CancellationToken,
) {
    let registration = match hub.register(id.clone()).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "could not register connection");
            return;
        }
    };
    let key = registration.key;
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(%key, "client connected");

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_pump(ws_tx, registration.queue, config.ping_interval));

    let reason = read_pump(ws_rx, key, &id, &hub, &config, &cancel).await;

    let _ = writer.await;
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    info!(%key, %reason, "client disconnected");
}

/// Decode inbound frames, stamp them, copy them to the sink and publish them.
///
/// Any terminal condition unregisters the connection, which closes its queue
/// and lets the write pump send the close frame.
pub async fn read_pump<S, E>(
    mut stream: S,
    key: ConnectionKey,
    id: &ClientId,
    hub: &HubHandle,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
) -> Disconnect
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = relay_inbound(&mut stream, id, hub, config, cancel).await;
    match &reason {
        Disconnect::Closed | Disconnect::Shutdown | Disconnect::HubClosed => {
            debug!(%key, %reason, "read pump finished");
        }
        _ => warn!(%key, %reason, "read pump failed"),
    }
    let _ = hub.unregister(key).await;
    reason
}

async fn relay_inbound<S, E>(
    stream: &mut S,
    id: &ClientId,
    hub: &HubHandle,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
) -> Disconnect
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + config.read_timeout;
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return Disconnect::Shutdown,
            frame = tokio::time::timeout_at(deadline, stream.next()) => frame,
        };

        let message = match frame {
            Err(_) => return Disconnect::Timeout,
            Ok(None) => return Disconnect::Closed,
            Ok(Some(Err(e))) => return Disconnect::Transport(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        let decoded = match message {
            Message::Text(text) => decode(text.as_str().as_bytes(), config.max_frame_bytes),
            Message::Binary(data) => decode(&data, config.max_frame_bytes),
            Message::Pong(_) => {
                deadline = Instant::now() + config.read_timeout;
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => return Disconnect::Closed,
        };
        let mut envelope = match decoded {
            Ok(envelope) => envelope,
            Err(reason) => return reason,
        };

        envelope.stamp(id, Utc::now());
        let _ = hub.forward_to_sink(envelope.clone());
        if hub.publish(envelope).await.is_err() {
            return Disconnect::HubClosed;
        }
    }
}

fn decode(frame: &[u8], max_frame_bytes: usize) -> Result<Envelope, Disconnect> {
    if frame.len() > max_frame_bytes {
        return Err(Disconnect::Oversize(frame.len()));
    }
    serde_json::from_slice(frame).map_err(|e| Disconnect::Decode(e.to_string()))
}

/// Drain the queue to the socket as JSON text frames, pinging every `ping_interval`.
///
/// A closed queue sends a close frame; any failed write ends the pump.
pub async fn write_pump<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<Arc<Envelope>>,
    ping_interval: Duration,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(envelope) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return;
                };
                let text = match serde_json::to_string(&*envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize envelope");
                        return;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "write failed");
                    return;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %e, "ping failed");
                    return;
                }
                tracing::trace!("sent ping");
            }
        }
    }
}
