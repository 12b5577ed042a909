use std::net::SocketAddr;

use serde::Serialize;

use crate::common::types::GuildId;

/// Grouping for diagnostic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticCategory {
    Signaling,
    Heartbeat,
    Discovery,
    Media,
    Connection,
}

/// State published to the application as the session progresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VoiceEvent {
    #[serde(rename = "LocalEndpointEvent")]
    LocalEndpoint {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        endpoint: SocketAddr,
    },

    #[serde(rename = "RemoteEndpointEvent")]
    RemoteEndpoint {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        ssrc: u32,
        endpoint: SocketAddr,
    },

    /// Session key received; media may flow.
    #[serde(rename = "ConnectedEvent")]
    Connected {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
    },

    #[serde(rename = "ClosedEvent")]
    Closed {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        code: u16,
        reason: String,
    },

    #[serde(rename = "DiagnosticEvent")]
    Diagnostic {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        category: DiagnosticCategory,
        message: String,
    },
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<VoiceEvent>;

/// Optional event sink; emitting never fails the caller.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<EventSender>,
}

impl EventEmitter {
    pub fn new(tx: Option<EventSender>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: VoiceEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn diagnostic(
        &self,
        guild_id: GuildId,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) {
        self.emit(VoiceEvent::Diagnostic {
            guild_id,
            category,
            message: message.into(),
        });
    }
}
