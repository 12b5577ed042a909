use secrecy::SecretString;

use crate::common::types::{GuildId, SessionId, UserId};

/// Identity presented to the relay in `Identify`. Owned by exactly one voice
/// session and dropped with it.
#[derive(Debug)]
pub struct Credentials {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub session_id: SessionId,
    pub token: SecretString,
}

impl Credentials {
    pub fn new(
        user_id: impl Into<UserId>,
        guild_id: impl Into<GuildId>,
        session_id: impl Into<SessionId>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            guild_id: guild_id.into(),
            session_id: session_id.into(),
            token: SecretString::new(token.into()),
        }
    }
}
