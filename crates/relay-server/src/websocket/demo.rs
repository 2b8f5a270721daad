//! Run-once synthetic tick stream, started by a client's `demo-start`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use parking_lot::Mutex;
use relay_core::{Envelope, BROADCAST, SERVER_SENDER, SERVER_TICK};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::hub::HubHandle;
use crate::metrics::DEMO_TICKS_TOTAL;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TickPayload {
    message: String,
    sent_at: String,
}

/// Broadcasts a `server-tick` every period once started. There is no stop
/// short of cancelling the token it was built with.
#[derive(Clone)]
pub struct DemoPublisher {
    running: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    hub: HubHandle,
    period: Duration,
    cancel: CancellationToken,
}

impl DemoPublisher {
    pub fn new(hub: HubHandle, period: Duration, cancel: CancellationToken) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
            hub,
            period,
            cancel,
        }
    }

    /// Start the stream unless it already runs. Returns `true` for the call that started it.
    pub fn ensure_started(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!(period_ms = self.period.as_millis() as u64, "starting demo tick stream");
        let handle = tokio::spawn(run_ticks(
            self.hub.clone(),
            self.period,
            self.cancel.clone(),
        ));
        *self.task.lock() = Some(handle);
        true
    }

    /// Hand over the tick task so shutdown can wait on it. `None` if never started.
    pub fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().take()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Envelope for tick number `n` produced at `at`.
pub fn tick_envelope(n: u64, at: DateTime<Utc>) -> Result<Envelope, serde_json::Error> {
    let payload = TickPayload {
        message: format!("server tick #{n}"),
        sent_at: at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    };
    Envelope::new(SERVER_SENDER, BROADCAST, SERVER_TICK)
        .at(at)
        .with_payload(&payload)
}

async fn run_ticks(hub: HubHandle, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut n: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        n += 1;
        let envelope = match tick_envelope(n, Utc::now()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to build tick payload");
                continue;
            }
        };

        let published = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            published = hub.publish(envelope) => published,
        };
        if published.is_err() {
            break;
        }
        counter!(DEMO_TICKS_TOTAL).increment(1);
    }
    info!(ticks = n, "demo tick stream stopped");
}
