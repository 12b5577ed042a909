use std::{net::SocketAddr, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    common::{errors::GatewayResult, types::GuildId},
    configs::VoiceConfig,
    gateway::{credentials::Credentials, events::EventEmitter},
    voice::session::VoiceSession,
};

/// Registry of live voice sessions, one per guild.
pub struct VoiceManager {
    sessions: DashMap<GuildId, Arc<VoiceSession>>,
    config: VoiceConfig,
    events: EventEmitter,
}

impl VoiceManager {
    pub fn new(config: VoiceConfig, events: EventEmitter) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            events,
        }
    }

    /// Opens and starts a session for the guild in `credentials`, replacing
    /// any session that guild already had.
    pub async fn join(
        &self,
        credentials: Credentials,
        endpoint: impl Into<String>,
        local_endpoint: Option<SocketAddr>,
    ) -> GatewayResult<Arc<VoiceSession>> {
        let guild_id = credentials.guild_id;
        if self.leave(guild_id).await {
            debug!("[{}] Replaced existing voice session", guild_id);
        }

        let session = Arc::new(
            VoiceSession::open(
                credentials,
                endpoint,
                local_endpoint,
                self.config.clone(),
                self.events.clone(),
            )
            .await?,
        );

        if let Err(e) = session.start().await {
            session.dispose().await;
            return Err(e);
        }

        self.sessions.insert(guild_id, session.clone());
        info!("[{}] Joined voice", guild_id);
        Ok(session)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    /// Disposes the guild's session. Returns whether there was one.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return false;
        };
        session.dispose().await;
        info!("[{}] Left voice", guild_id);
        true
    }

    pub async fn leave_all(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
        for guild_id in guilds {
            self.leave(guild_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
