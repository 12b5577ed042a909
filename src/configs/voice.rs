use std::{net::SocketAddr, time::Duration};

use secrecy::SecretString;
use serde::Deserialize;

use crate::gateway::constants::VOICE_GATEWAY_VERSION;

/// Tunables for the signaling manager, discovery and reconnect supervision.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VoiceConfig {
    /// Protocol version appended to bare signaling hosts (`wss://host/?v=N`).
    pub gateway_version: u8,
    /// Local address the shared media socket binds to.
    pub udp_bind: SocketAddr,
    pub discovery_timeout_ms: u64,
    /// How long `start()` waits for the first handshake to finish.
    pub handshake_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
    /// Bound of the audio input channel, in written chunks.
    pub input_capacity: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            gateway_version: VOICE_GATEWAY_VERSION,
            udp_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            discovery_timeout_ms: 5_000,
            handshake_timeout_ms: 15_000,
            max_reconnect_attempts: 5,
            backoff_base_ms: 1_000,
            input_capacity: 256,
        }
    }
}

impl VoiceConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Credentials and endpoint for the CLI's single session.
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub user_id: u64,
    pub guild_id: u64,
    pub session_id: String,
    pub token: SecretString,
    pub endpoint: String,
    #[serde(default)]
    pub local_endpoint: Option<SocketAddr>,
}
