use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    net::UdpSocket,
    sync::{Mutex as AsyncMutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::{
        errors::{GatewayError, GatewayResult},
        types::{GuildId, Shared},
    },
    configs::VoiceConfig,
    gateway::{
        constants::SENDER_SHUTDOWN_MS,
        credentials::Credentials,
        events::{DiagnosticCategory, EventEmitter},
        input::{AudioWriter, audio_channel},
        params::SessionParameters,
        session::{VoiceGateway, backoff::Backoff, types::SessionOutcome},
        state::{AtomicSessionState, SessionState},
        udp_link::{MediaSender, SenderStats, SenderStatsSnapshot},
    },
};

struct Running {
    supervisor: JoinHandle<GatewayResult<()>>,
    sender: JoinHandle<MediaSender>,
}

/// Whichever half of the sender is not in use: the idle sender, or the
/// tasks driving it.
struct Lifecycle {
    sender: Option<MediaSender>,
    running: Option<Running>,
}

enum Handshake {
    Ready,
    Failed(GatewayError),
    SupervisorExited(GatewayError),
}

/// One voice conversation: a signaling manager and the media sender fed by
/// the parameters it publishes, sharing one UDP socket.
pub struct VoiceSession {
    guild_id: GuildId,
    gateway: Arc<VoiceGateway>,
    writer: AudioWriter,
    stats: Arc<SenderStats>,
    config: VoiceConfig,
    events: EventEmitter,
    state: Arc<AtomicSessionState>,
    cancel_token: Mutex<CancellationToken>,
    lifecycle: Shared<Lifecycle>,
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.cancel_token.lock().cancel();
    }
}

impl VoiceSession {
    /// Binds the media socket and wires the sender to the signaling
    /// manager. Nothing is connected until [`start`](Self::start).
    pub async fn open(
        credentials: Credentials,
        signaling_uri: impl Into<String>,
        local_endpoint: Option<SocketAddr>,
        config: VoiceConfig,
        events: EventEmitter,
    ) -> GatewayResult<Self> {
        let guild_id = credentials.guild_id;
        let socket = Arc::new(UdpSocket::bind(config.udp_bind).await?);
        debug!(
            "[{}] Media socket bound to {}",
            guild_id,
            socket.local_addr()?
        );

        let (writer, reader) = audio_channel(config.input_capacity);
        let gateway = Arc::new(VoiceGateway::new(
            credentials,
            signaling_uri,
            local_endpoint,
            socket.clone(),
            config.clone(),
            events.clone(),
        ));
        let sender = MediaSender::new(
            guild_id,
            socket,
            reader,
            gateway.parameters(),
            events.clone(),
        );

        Ok(Self {
            guild_id,
            gateway,
            writer,
            stats: sender.stats(),
            config,
            events,
            state: Arc::new(AtomicSessionState::new(SessionState::Initialized)),
            cancel_token: Mutex::new(CancellationToken::new()),
            lifecycle: Arc::new(AsyncMutex::new(Lifecycle {
                sender: Some(sender),
                running: None,
            })),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    pub fn parameters(&self) -> watch::Receiver<SessionParameters> {
        self.gateway.parameters()
    }

    pub fn stats(&self) -> SenderStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ping(&self) -> i64 {
        self.gateway.ping()
    }

    /// Where the encoder writes `u16-LE length || opus` frames.
    pub fn audio_writer(&self) -> AudioWriter {
        self.writer.clone()
    }

    pub fn set_speaking(&self, speaking: bool, delay_ms: i32) -> GatewayResult<()> {
        self.gateway.set_speaking(speaking, delay_ms)
    }

    /// Connects, completes the first handshake and starts sending.
    ///
    /// A failure before the first handshake is returned here and leaves the
    /// session stopped. Later connection losses are retried in the
    /// background; once the relay ends the session or retries run out, the
    /// sender stops and the session is back at `Initialized`.
    pub async fn start(&self) -> GatewayResult<()> {
        match self
            .state
            .try_transition(SessionState::Initialized, SessionState::Connecting)
        {
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

        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(ended) = lifecycle.running.take() {
            lifecycle.sender = collect(self.guild_id, ended).await;
        }
        let Some(sender) = lifecycle.sender.take() else {
            error!("[{}] Media sender was lost; cannot start", self.guild_id);
            self.state.revert_to_initialized();
            return Err(GatewayError::NotConnected);
        };

        let cancel = CancellationToken::new();
        *self.cancel_token.lock() = cancel.clone();

        let mut params = self.gateway.parameters();
        params.borrow_and_update();

        let mut supervisor = tokio::spawn(supervise(
            self.gateway.clone(),
            self.state.clone(),
            self.config.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        let sender = tokio::spawn(sender.run(cancel.clone()));

        let handshake = tokio::time::timeout(self.config.handshake_timeout(), async {
            tokio::select! {
                biased;
                res = &mut supervisor => Handshake::SupervisorExited(match res {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => GatewayError::NotConnected,
                    Err(e) => {
                        error!("[{}] Supervisor task failed: {}", self.guild_id, e);
                        GatewayError::NotConnected
                    }
                }),
                res = wait_ready(&mut params) => match res {
                    Ok(()) => Handshake::Ready,
                    Err(e) => Handshake::Failed(e),
                },
                _ = cancel.cancelled() => Handshake::Failed(GatewayError::Cancelled),
            }
        })
        .await
        .unwrap_or(Handshake::Failed(GatewayError::HandshakeTimeout));

        let err = match handshake {
            Handshake::Ready => {
                lifecycle.running = Some(Running { supervisor, sender });
                if let Err(e) = self
                    .state
                    .transition(SessionState::Connecting, SessionState::Ready)
                {
                    drop(lifecycle);
                    self.teardown().await;
                    return Err(e);
                }
                info!("[{}] Voice session started", self.guild_id);
                if cancel.is_cancelled() {
                    // Supervision ended between the handshake and here.
                    self.state
                        .try_transition(SessionState::Ready, SessionState::Initialized);
                }
                return Ok(());
            }
            Handshake::Failed(e) => {
                cancel.cancel();
                match supervisor.await {
                    // The supervisor gave up first and cancelled the run itself.
                    Ok(Err(inner)) if matches!(e, GatewayError::Cancelled) => inner,
                    Ok(Err(inner)) => {
                        debug!("[{}] Supervisor ended with: {}", self.guild_id, inner);
                        e
                    }
                    _ => e,
                }
            }
            Handshake::SupervisorExited(e) => {
                cancel.cancel();
                e
            }
        };

        lifecycle.sender = reclaim(self.guild_id, sender).await;
        self.state.revert_to_initialized();
        warn!("[{}] Voice session failed to start: {}", self.guild_id, err);
        Err(err)
    }

    /// Stops both tasks and waits until they are gone. The session can be
    /// started again.
    pub async fn stop(&self) {
        self.teardown().await;
        if self.state.revert_to_initialized() != SessionState::Initialized {
            info!("[{}] Voice session stopped", self.guild_id);
        }
    }

    /// Stops the session for good. Only the first call does anything.
    pub async fn dispose(&self) -> bool {
        let prior = self.state.swap(SessionState::Disposing);
        if prior.is_disposing() {
            return false;
        }

        self.teardown().await;
        self.gateway.dispose();
        self.state.swap(SessionState::Disposed);
        info!("[{}] Voice session disposed", self.guild_id);
        true
    }

    async fn teardown(&self) {
        self.cancel_token.lock().cancel();

        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.running.take() {
            lifecycle.sender = collect(self.guild_id, running).await;
        }
    }
}

/// Waits out both tasks of a run and returns the sender.
async fn collect(guild_id: GuildId, running: Running) -> Option<MediaSender> {
    match running.supervisor.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[{}] Supervisor ended with: {}", guild_id, e),
        Err(e) => error!("[{}] Supervisor task failed: {}", guild_id, e),
    }
    reclaim(guild_id, running.sender).await
}

async fn wait_ready(params: &mut watch::Receiver<SessionParameters>) -> GatewayResult<()> {
    loop {
        params
            .changed()
            .await
            .map_err(|_| GatewayError::NotConnected)?;
        if params.borrow_and_update().is_ready() {
            return Ok(());
        }
    }
}

async fn reclaim(guild_id: GuildId, task: JoinHandle<MediaSender>) -> Option<MediaSender> {
    match tokio::time::timeout(Duration::from_millis(SENDER_SHUTDOWN_MS), task).await {
        Ok(Ok(sender)) => Some(sender),
        Ok(Err(e)) => {
            error!("[{}] Media sender task failed: {}", guild_id, e);
            None
        }
        Err(_) => {
            warn!("[{}] Media sender did not stop in time", guild_id);
            None
        }
    }
}

/// Keeps the signaling manager connected. When supervision ends on its
/// own rather than through `cancel`, the run's token is cancelled so the
/// sender stops, and a `Ready` session drops back to `Initialized`.
async fn supervise(
    gateway: Arc<VoiceGateway>,
    state: Arc<AtomicSessionState>,
    config: VoiceConfig,
    events: EventEmitter,
    cancel: CancellationToken,
) -> GatewayResult<()> {
    let result = keep_connected(&gateway, &config, &events, &cancel).await;
    if cancel.is_cancelled() {
        return result;
    }

    cancel.cancel();
    if state.try_transition(SessionState::Ready, SessionState::Initialized) == SessionState::Ready {
        warn!(
            "[{}] Voice session ended; start it again to reconnect",
            gateway.guild_id()
        );
    }
    result
}

/// Before the first completed handshake any ending is final; afterwards
/// lost connections are retried with backoff.
async fn keep_connected(
    gateway: &VoiceGateway,
    config: &VoiceConfig,
    events: &EventEmitter,
    cancel: &CancellationToken,
) -> GatewayResult<()> {
    let guild_id = gateway.guild_id();
    let mut backoff = Backoff::new(config.backoff_base_ms, config.max_reconnect_attempts);
    let mut established = false;

    loop {
        let handshakes = gateway.handshakes();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = gateway.run() => res,
        };

        if gateway.handshakes() > handshakes {
            established = true;
            backoff.reset();
        }

        if !established {
            return result.map(|_| ());
        }

        let err = match result {
            Ok(SessionOutcome::Shutdown) => {
                info!("[{}] Relay ended the session", guild_id);
                return Ok(());
            }
            Err(GatewayError::Cancelled) => return Ok(()),
            Err(e) if e.is_fatal() => {
                error!("[{}] Voice gateway failed: {}", guild_id, e);
                events.diagnostic(guild_id, DiagnosticCategory::Connection, e.to_string());
                return Err(e);
            }
            Ok(SessionOutcome::Reconnect) => GatewayError::NotConnected,
            Err(e) => e,
        };

        if backoff.is_exhausted() {
            error!("[{}] Max reconnect attempts reached: {}", guild_id, err);
            events.diagnostic(
                guild_id,
                DiagnosticCategory::Connection,
                format!("giving up after {} attempts: {}", config.max_reconnect_attempts, err),
            );
            return Err(err);
        }

        let delay = backoff.next();
        warn!(
            "[{}] Connection lost ({}). Reconnecting in {:?}",
            guild_id, err, delay
        );
        events.diagnostic(
            guild_id,
            DiagnosticCategory::Connection,
            format!("reconnecting in {delay:?}: {err}"),
        );

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
