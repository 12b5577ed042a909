use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UdpSocket,
    sync::{
        mpsc::{self, UnboundedSender},
        watch,
    },
};
use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::{
        errors::{GatewayError, GatewayResult},
        types::GuildId,
    },
    configs::VoiceConfig,
    gateway::{
        credentials::Credentials,
        events::{EventEmitter, VoiceEvent},
        params::{ParameterPublisher, SessionParameters},
        protocol::encode_speaking,
        state::{AtomicSessionState, SessionState},
    },
};

pub(crate) mod backoff;
mod handler;
mod heartbeat;
mod pumps;
pub mod types;
pub mod voice;

#[cfg(test)]
mod tests;

use self::{
    handler::Dispatcher,
    heartbeat::{HeartbeatTracker, heartbeat_duty},
    pumps::{receive_pump, send_pump},
    types::SessionOutcome,
};

/// Signaling session manager: one persistent socket to the relay, the
/// handshake that runs over it and the parameters it yields.
///
/// A run drives four duties together (heartbeat, dispatch, receive pump,
/// send pump); the first one to finish ends the run and the rest are
/// dropped. Once a run has ended the state is back at `Initialized`, the
/// parameters are withdrawn and [`run`](Self::run) may be called again.
pub struct VoiceGateway {
    credentials: Credentials,
    endpoint: String,
    local_endpoint: Option<SocketAddr>,
    socket: Arc<UdpSocket>,
    config: VoiceConfig,
    state: AtomicSessionState,
    params: ParameterPublisher,
    events: EventEmitter,
    cancel_token: Mutex<CancellationToken>,
    outbound: Mutex<Option<UnboundedSender<Message>>>,
    heartbeat: HeartbeatTracker,
    handshakes: AtomicU64,
}

impl Drop for VoiceGateway {
    fn drop(&mut self) {
        self.cancel_token.lock().cancel();
    }
}

/// Undoes the per-run bookkeeping however the run ends.
struct RunGuard<'a> {
    gateway: &'a VoiceGateway,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.gateway.outbound.lock().take();
        // The key dies with the connection; senders must stop until the next one.
        self.gateway.params.reset(self.gateway.local_endpoint);
        let prior = self.gateway.state.revert_to_initialized();
        debug!(
            "[{}] Run finished in state {:?}",
            self.gateway.guild_id(),
            prior
        );
    }
}

impl VoiceGateway {
    pub fn new(
        credentials: Credentials,
        endpoint: impl Into<String>,
        local_endpoint: Option<SocketAddr>,
        socket: Arc<UdpSocket>,
        config: VoiceConfig,
        events: EventEmitter,
    ) -> Self {
        Self {
            credentials,
            endpoint: endpoint.into(),
            local_endpoint,
            socket,
            config,
            state: AtomicSessionState::new(SessionState::Initialized),
            params: ParameterPublisher::new(SessionParameters::with_local_endpoint(
                local_endpoint,
            )),
            events,
            cancel_token: Mutex::new(CancellationToken::new()),
            outbound: Mutex::new(None),
            heartbeat: HeartbeatTracker::new(),
            handshakes: AtomicU64::new(0),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.credentials.guild_id
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// Round trip of the last acknowledged heartbeat in ms, `-1` if none.
    pub fn ping(&self) -> i64 {
        self.heartbeat.ping_ms()
    }

    /// Handshakes completed over the lifetime of this manager.
    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::Acquire)
    }

    /// A non-blocking view of the handshake results.
    pub fn parameters(&self) -> watch::Receiver<SessionParameters> {
        self.params.subscribe()
    }

    fn signaling_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!(
                "wss://{}/?v={}",
                self.endpoint.trim_end_matches('/'),
                self.config.gateway_version
            )
        }
    }

    /// Connects to the signaling endpoint and drives the handshake until the
    /// socket closes, a duty fails or the run is cancelled.
    pub async fn run(&self) -> GatewayResult<SessionOutcome> {
        let cancel = self.begin_run()?;
        let _guard = RunGuard { gateway: self };

        let url = self.signaling_url();
        debug!("[{}] Connecting to voice gateway: {}", self.guild_id(), url);

        let ws = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            res = tokio_tungstenite::connect_async(url.as_str()) => res?.0,
        };

        self.drive(ws, cancel).await
    }

    /// Same as [`run`](Self::run) over an already-open socket.
    pub async fn run_on<S>(&self, ws: WebSocketStream<S>) -> GatewayResult<SessionOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let cancel = self.begin_run()?;
        let _guard = RunGuard { gateway: self };
        self.drive(ws, cancel).await
    }

    fn begin_run(&self) -> GatewayResult<CancellationToken> {
        let prior = self
            .state
            .try_transition(SessionState::Initialized, SessionState::Connecting);

        match prior {
            SessionState::Initialized => {}
            SessionState::Connecting | SessionState::Connected | SessionState::Ready => {
                return Err(GatewayError::AlreadyRunning);
            }
            from => {
                return Err(GatewayError::InvalidStateTransition {
                    from,
                    to: SessionState::Connecting,
                });
            }
        }

        let token = CancellationToken::new();
        *self.cancel_token.lock() = token.clone();
        self.params.reset(self.local_endpoint);
        self.heartbeat.reset();
        Ok(token)
    }

    async fn drive<S>(
        &self,
        ws: WebSocketStream<S>,
        cancel: CancellationToken,
    ) -> GatewayResult<SessionOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state
            .transition(SessionState::Connecting, SessionState::Connected)?;
        info!("[{}] Voice gateway connected", self.guild_id());

        let (write, read) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = flume::unbounded::<String>();
        let (hello_tx, hello_rx) = watch::channel(None);
        *self.outbound.lock() = Some(out_tx.clone());

        let dispatcher = Dispatcher::new(self, out_tx.clone(), hello_tx);

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[{}] Run cancelled", self.guild_id());
                Err(GatewayError::Cancelled)
            }
            res = heartbeat_duty(self, hello_rx, out_tx) => res,
            res = dispatcher.run(in_rx) => res,
            res = receive_pump(self, read, in_tx) => res,
            res = send_pump(write, out_rx) => res,
        }
    }

    /// Cancels the current run, if any. The manager can be run again.
    pub fn cancel(&self) {
        self.cancel_token.lock().cancel();
    }

    /// Tears the manager down for good. Only the first call does anything.
    pub fn dispose(&self) -> bool {
        let prior = self.state.swap(SessionState::Disposing);
        if prior.is_disposing() {
            return false;
        }
        self.cancel();
        self.state.swap(SessionState::Disposed);
        debug!("[{}] Voice gateway disposed", self.guild_id());
        true
    }

    /// Queues a `Speaking` update. Needs a completed handshake.
    pub fn set_speaking(&self, speaking: bool, delay: i32) -> GatewayResult<()> {
        if self.state.load() != SessionState::Ready {
            return Err(GatewayError::NotConnected);
        }
        let ssrc = self
            .params
            .snapshot()
            .ssrc
            .ok_or(GatewayError::NotConnected)?;

        let msg = encode_speaking(speaking, delay, ssrc)?;
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(GatewayError::NotConnected)?;
        tx.send(Message::Text(msg.into()))
            .map_err(|_| GatewayError::NotConnected)
    }

    fn emit_close(&self, code: u16, reason: String) {
        self.events.emit(VoiceEvent::Closed {
            guild_id: self.guild_id(),
            code,
            reason,
        });
    }

    fn send_text(&self, tx: &UnboundedSender<Message>, text: String) -> GatewayResult<()> {
        if tx.send(Message::Text(text.into())).is_err() {
            warn!("[{}] Outbound queue closed", self.guild_id());
            return Err(GatewayError::NotConnected);
        }
        Ok(())
    }
}
