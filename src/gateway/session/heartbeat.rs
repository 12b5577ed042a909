use std::{
    sync::atomic::{AtomicI32, AtomicI64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc::UnboundedSender, watch},
    time::Instant,
};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::trace;

use super::{VoiceGateway, types::SessionOutcome};
use crate::{common::errors::GatewayResult, gateway::protocol::encode_heartbeat};

/// Nonce bookkeeping shared by the heartbeat duty (writer) and the dispatch
/// duty (ack reader).
#[derive(Debug, Default)]
pub(crate) struct HeartbeatTracker {
    next_nonce: AtomicI32,
    last_sent: Mutex<Option<(i32, Instant)>>,
    ping_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    Matched(Duration),
    Mismatch { expected: Option<i32> },
}

impl HeartbeatTracker {
    pub(crate) fn new() -> Self {
        Self {
            ping_ms: AtomicI64::new(-1),
            ..Self::default()
        }
    }

    pub(crate) fn reset(&self) {
        self.next_nonce.store(0, Ordering::Relaxed);
        *self.last_sent.lock() = None;
    }

    pub(crate) fn next_nonce(&self) -> i32 {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        *self.last_sent.lock() = Some((nonce, Instant::now()));
        nonce
    }

    pub(crate) fn acknowledge(&self, nonce: i32) -> AckOutcome {
        let last = *self.last_sent.lock();
        match last {
            Some((sent, at)) if sent == nonce => {
                let rtt = at.elapsed();
                self.ping_ms
                    .store(rtt.as_millis() as i64, Ordering::Relaxed);
                AckOutcome::Matched(rtt)
            }
            other => AckOutcome::Mismatch {
                expected: other.map(|(n, _)| n),
            },
        }
    }

    /// Last measured round trip, or `-1` before the first matched ack.
    pub(crate) fn ping_ms(&self) -> i64 {
        self.ping_ms.load(Ordering::Relaxed)
    }
}

/// Waits for Hello, then sends a heartbeat every interval until the run
/// ends. A repeated Hello changes the interval for the next sleep.
pub(super) async fn heartbeat_duty(
    gateway: &VoiceGateway,
    mut hello: watch::Receiver<Option<Duration>>,
    tx: UnboundedSender<Message>,
) -> GatewayResult<SessionOutcome> {
    if hello.wait_for(Option::is_some).await.is_err() {
        return Ok(SessionOutcome::Reconnect);
    }

    loop {
        let current = *hello.borrow();
        let Some(interval) = current else {
            return Ok(SessionOutcome::Reconnect);
        };
        tokio::time::sleep(interval).await;

        let nonce = gateway.heartbeat.next_nonce();
        let msg = encode_heartbeat(nonce)?;
        if tx.send(Message::Text(msg.into())).is_err() {
            return Ok(SessionOutcome::Reconnect);
        }
        trace!("[{}] Heartbeat {} sent", gateway.guild_id(), nonce);
    }
}
