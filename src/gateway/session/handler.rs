use std::{sync::atomic::Ordering, time::Duration};

use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};

use super::{VoiceGateway, heartbeat::AckOutcome, types::SessionOutcome, voice::discover_ip};
use crate::{
    common::errors::{GatewayError, GatewayResult},
    gateway::{
        events::{DiagnosticCategory, VoiceEvent},
        protocol::{
            EncryptionMode, EncryptionModes, HeartbeatAck, Hello, Opcode, Ready,
            SessionDescription, decode_heartbeat_ack, decode_hello, decode_opcode, decode_ready,
            decode_session_description, encode_identify, encode_select_protocol,
        },
        state::SessionState,
    },
};

/// The dispatch duty: handles inbound signaling messages strictly in the
/// order they arrived.
pub(super) struct Dispatcher<'a> {
    gateway: &'a VoiceGateway,
    tx: UnboundedSender<Message>,
    hello: watch::Sender<Option<Duration>>,
}

impl<'a> Dispatcher<'a> {
    pub(super) fn new(
        gateway: &'a VoiceGateway,
        tx: UnboundedSender<Message>,
        hello: watch::Sender<Option<Duration>>,
    ) -> Self {
        Self { gateway, tx, hello }
    }

    pub(super) async fn run(self, inbound: flume::Receiver<String>) -> GatewayResult<SessionOutcome> {
        while let Ok(text) = inbound.recv_async().await {
            match self.handle(&text).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("[{}] Skipping message: {}", self.gateway.guild_id(), e);
                    self.diagnostic(DiagnosticCategory::Signaling, e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(SessionOutcome::Reconnect)
    }

    async fn handle(&self, text: &str) -> GatewayResult<()> {
        let envelope = decode_opcode(text)?;

        match envelope.opcode() {
            Some(Opcode::Hello) => self.on_hello(decode_hello(envelope.d)?),
            Some(Opcode::Ready) => self.on_ready(decode_ready(envelope.d)?).await,
            Some(Opcode::SessionDescription) => {
                self.on_session_description(decode_session_description(envelope.d)?)
            }
            Some(Opcode::HeartbeatAck) => {
                self.on_heartbeat_ack(decode_heartbeat_ack(envelope.d)?);
                Ok(())
            }
            Some(op) => {
                trace!("[{}] Ignoring {:?}", self.gateway.guild_id(), op);
                Ok(())
            }
            None => {
                debug!(
                    "[{}] Ignoring unknown opcode {}",
                    self.gateway.guild_id(),
                    envelope.op
                );
                Ok(())
            }
        }
    }

    fn on_hello(&self, hello: Hello) -> GatewayResult<()> {
        debug!(
            "[{}] Hello: heartbeat every {:?}",
            self.gateway.guild_id(),
            hello.heartbeat_interval
        );
        self.hello.send_replace(Some(hello.heartbeat_interval));
        self.send(encode_identify(&self.gateway.credentials)?)
    }

    async fn on_ready(&self, ready: Ready) -> GatewayResult<()> {
        let gateway = self.gateway;
        let guild_id = gateway.guild_id();
        let relay = ready.endpoint()?;

        if !ready.modes.contains(EncryptionModes::LITE) {
            warn!(
                "[{}] Relay does not offer {} (offered {:?})",
                guild_id,
                EncryptionMode::XSalsa20Poly1305Lite.as_str(),
                ready.modes
            );
            return Err(GatewayError::UnsupportedMode(ready.modes));
        }

        info!(
            "[{}] Ready: ssrc={}, relay={}, modes={:?}",
            guild_id, ready.ssrc, relay, ready.modes
        );
        gateway.params.publish_remote(ready.ssrc, relay);
        gateway.events.emit(VoiceEvent::RemoteEndpoint {
            guild_id,
            ssrc: ready.ssrc,
            endpoint: relay,
        });

        let local = match gateway.local_endpoint {
            Some(local) => {
                debug!("[{}] Using known local endpoint {}", guild_id, local);
                local
            }
            None => {
                let local = discover_ip(&gateway.socket, relay, gateway.config.discovery_timeout())
                    .await
                    .inspect_err(|e| {
                        self.diagnostic(DiagnosticCategory::Discovery, e.to_string());
                    })?;
                debug!("[{}] Discovered local endpoint {}", guild_id, local);
                gateway.params.publish_local(local);
                gateway.events.emit(VoiceEvent::LocalEndpoint {
                    guild_id,
                    endpoint: local,
                });
                local
            }
        };

        self.send(encode_select_protocol(
            local,
            EncryptionMode::XSalsa20Poly1305Lite,
        )?)
    }

    fn on_session_description(&self, desc: SessionDescription) -> GatewayResult<()> {
        let gateway = self.gateway;
        gateway.params.publish_key(desc.secret_key);

        let prior = gateway
            .state
            .try_transition(SessionState::Connected, SessionState::Ready);
        if prior != SessionState::Connected {
            debug!(
                "[{}] Session key refreshed in state {:?}",
                gateway.guild_id(),
                prior
            );
            return Ok(());
        }

        gateway.handshakes.fetch_add(1, Ordering::AcqRel);
        info!("[{}] Session ready", gateway.guild_id());
        gateway.events.emit(VoiceEvent::Connected {
            guild_id: gateway.guild_id(),
        });
        Ok(())
    }

    fn on_heartbeat_ack(&self, ack: HeartbeatAck) {
        match self.gateway.heartbeat.acknowledge(ack.nonce) {
            AckOutcome::Matched(rtt) => {
                trace!("[{}] Heartbeat ack, rtt {:?}", self.gateway.guild_id(), rtt);
            }
            AckOutcome::Mismatch { expected } => {
                let message = format!(
                    "heartbeat ack nonce {} does not match last sent {:?}",
                    ack.nonce, expected
                );
                warn!("[{}] {}", self.gateway.guild_id(), message);
                self.diagnostic(DiagnosticCategory::Heartbeat, message);
            }
        }
    }

    fn send(&self, text: String) -> GatewayResult<()> {
        self.gateway.send_text(&self.tx, text)
    }

    fn diagnostic(&self, category: DiagnosticCategory, message: String) {
        self.gateway
            .events
            .diagnostic(self.gateway.guild_id(), category, message);
    }
}
