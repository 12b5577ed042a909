use std::{fmt, net::SocketAddr};

use tokio::sync::watch;

use crate::gateway::constants::SECRET_KEY_LEN;

/// 32-byte symmetric key issued by the relay in `SessionDescription`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SECRET_KEY_LEN]);

impl SessionKey {
    pub fn new(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Values learned during the handshake. Fields stay `None` until the
/// corresponding message has been processed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionParameters {
    pub ssrc: Option<u32>,
    pub relay_endpoint: Option<SocketAddr>,
    pub local_endpoint: Option<SocketAddr>,
    pub session_key: Option<SessionKey>,
}

/// What the media sender needs to put a packet on the wire.
#[derive(Debug, Clone)]
pub struct TransmitTarget {
    pub ssrc: u32,
    pub relay_endpoint: SocketAddr,
    pub session_key: SessionKey,
}

impl SessionParameters {
    pub fn with_local_endpoint(local_endpoint: Option<SocketAddr>) -> Self {
        Self {
            local_endpoint,
            ..Self::default()
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ssrc.is_some() && self.relay_endpoint.is_some() && self.session_key.is_some()
    }

    pub fn transmit_target(&self) -> Option<TransmitTarget> {
        Some(TransmitTarget {
            ssrc: self.ssrc?,
            relay_endpoint: self.relay_endpoint?,
            session_key: self.session_key.clone()?,
        })
    }
}

/// Sole writer of the parameter cell. Readers come from [`subscribe`]
/// and never block.
///
/// [`subscribe`]: ParameterPublisher::subscribe
#[derive(Debug)]
pub struct ParameterPublisher {
    tx: watch::Sender<SessionParameters>,
}

impl ParameterPublisher {
    pub fn new(initial: SessionParameters) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionParameters> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionParameters {
        self.tx.borrow().clone()
    }

    pub fn reset(&self, local_endpoint: Option<SocketAddr>) {
        self.tx
            .send_replace(SessionParameters::with_local_endpoint(local_endpoint));
    }

    pub fn publish_remote(&self, ssrc: u32, relay_endpoint: SocketAddr) {
        self.tx.send_modify(|p| {
            p.ssrc = Some(ssrc);
            p.relay_endpoint = Some(relay_endpoint);
        });
    }

    pub fn publish_local(&self, local_endpoint: SocketAddr) {
        self.tx
            .send_modify(|p| p.local_endpoint = Some(local_endpoint));
    }

    pub fn publish_key(&self, key: SessionKey) {
        self.tx.send_modify(|p| p.session_key = Some(key));
    }
}
