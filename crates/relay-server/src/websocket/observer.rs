//! Server-side consumer of the inbound sink: logs traffic and starts the demo stream.

use futures::StreamExt;
use relay_core::{Envelope, DEMO_START};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::demo::DemoPublisher;
use super::hub::Sink;

const EMPTY_PAYLOAD: &str = "<empty>";

/// Consume `sink` until cancelled or the hub goes away.
pub fn spawn_observer(sink: Sink, demo: DemoPublisher, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(observe(sink, demo, cancel))
}

pub async fn observe(sink: Sink, demo: DemoPublisher, cancel: CancellationToken) {
    let mut inbound = sink.into_stream();
    loop {
        let envelope = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = inbound.next() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        handle(&envelope, &demo);
    }
}

fn handle(envelope: &Envelope, demo: &DemoPublisher) {
    info!(
        kind = %envelope.kind,
        sender = %envelope.sender,
        receiver = %envelope.receiver,
        payload = payload_for_log(envelope),
        "websocket message"
    );
    if envelope.kind == DEMO_START {
        info!(sender = %envelope.sender, "demo start requested");
        let _ = demo.ensure_started();
    }
}

fn payload_for_log(envelope: &Envelope) -> &str {
    match envelope.payload_str() {
        None | Some("") | Some("null") => EMPTY_PAYLOAD,
        Some(raw) => raw,
    }
}
