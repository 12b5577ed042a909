use thiserror::Error;

use crate::gateway::{protocol::EncryptionModes, state::SessionState};

/// Errors raised by the signaling manager, the media sender and the voice
/// session that composes them.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A signaling payload is missing, duplicating or mistyping a field.
    #[error("malformed {context} payload: {reason}")]
    MalformedPayload {
        context: &'static str,
        reason: String,
    },

    /// The relay does not offer `xsalsa20_poly1305_lite`.
    #[error("unsupported encryption mode (relay offered {0:?})")]
    UnsupportedMode(EncryptionModes),

    #[error("ip discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("packet encryption failed")]
    EncryptionFailure,

    #[error("voice session is not connected")]
    NotConnected,

    #[error("voice session is already running")]
    AlreadyRunning,

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("voice session was cancelled")]
    Cancelled,

    /// Ready carried an address that is not a literal IP.
    #[error("relay advertised an invalid media endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl GatewayError {
    /// Builds a [`GatewayError::MalformedPayload`] from a decode failure.
    pub fn malformed(context: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::MalformedPayload {
            context,
            reason: reason.to_string(),
        }
    }

    /// Only a malformed message is skipped; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. })
    }

    /// Errors that no amount of reconnecting will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMode(_) | Self::InvalidStateTransition { .. }
        )
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
