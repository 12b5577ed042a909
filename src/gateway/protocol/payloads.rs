//! Signaling message codec.
//!
//! Inbound messages are decoded in two steps: [`decode_opcode`] splits the
//! `{"op":..,"d":..}` envelope without touching `d`, then the per-opcode
//! decoder parses `d` into a typed payload. Every field of a payload is
//! required exactly once; anything else rejects the whole message.

use std::{fmt, net::SocketAddr, time::Duration};

use secrecy::ExposeSecret;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, IgnoredAny, MapAccess, Visitor},
};
use serde_json::value::RawValue;

use super::{EncryptionMode, EncryptionModes, Opcode};
use crate::{
    common::errors::{GatewayError, GatewayResult},
    gateway::{constants::SECRET_KEY_LEN, credentials::Credentials, params::SessionKey},
};

/// An inbound message with its data left undecoded.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub op: u8,
    pub d: &'a RawValue,
}

impl Envelope<'_> {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.op)
    }
}

impl<'de> Deserialize<'de> for Envelope<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Envelope<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object with `op` followed by `d`")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let op = match map.next_key::<String>()? {
                    Some(key) if key == "op" => map.next_value::<u8>()?,
                    Some(key) => {
                        return Err(de::Error::custom(format!(
                            "expected `op` as first field, found `{key}`"
                        )));
                    }
                    None => return Err(de::Error::missing_field("op")),
                };

                let d = match map.next_key::<String>()? {
                    Some(key) if key == "d" => map.next_value::<&'de RawValue>()?,
                    Some(key) => {
                        return Err(de::Error::custom(format!(
                            "expected `d` after `op`, found `{key}`"
                        )));
                    }
                    None => return Err(de::Error::missing_field("d")),
                };

                // Trailing fields (e.g. `seq`) are tolerated, repeats are not.
                while let Some(key) = map.next_key::<String>()? {
                    if key == "op" || key == "d" {
                        return Err(de::Error::custom(format!("duplicate field `{key}`")));
                    }
                    map.next_value::<IgnoredAny>()?;
                }

                Ok(Envelope { op, d })
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

/// Splits an inbound text message into its opcode and undecoded data.
pub fn decode_opcode(text: &str) -> GatewayResult<Envelope<'_>> {
    serde_json::from_str(text).map_err(|e| GatewayError::malformed("envelope", e))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hello {
    pub heartbeat_interval: Duration,
}

#[derive(Deserialize)]
struct HelloData {
    heartbeat_interval: f64,
}

pub fn decode_hello(d: &RawValue) -> GatewayResult<Hello> {
    let data: HelloData =
        serde_json::from_str(d.get()).map_err(|e| GatewayError::malformed("hello", e))?;

    let millis = data.heartbeat_interval;
    if !millis.is_finite() || millis <= 0.0 {
        return Err(GatewayError::malformed(
            "hello",
            format!("heartbeat_interval out of range: {millis}"),
        ));
    }

    Ok(Hello {
        heartbeat_interval: Duration::from_secs_f64(millis / 1000.0),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    pub modes: EncryptionModes,
}

impl Ready {
    /// The relay's media endpoint. Only literal IPs are accepted.
    pub fn endpoint(&self) -> GatewayResult<SocketAddr> {
        let ip = self
            .ip
            .trim()
            .parse()
            .map_err(|_| GatewayError::InvalidEndpoint(self.ip.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Deserialize)]
struct ReadyData {
    ssrc: u32,
    ip: String,
    port: u16,
    modes: Vec<String>,
}

pub fn decode_ready(d: &RawValue) -> GatewayResult<Ready> {
    let data: ReadyData =
        serde_json::from_str(d.get()).map_err(|e| GatewayError::malformed("ready", e))?;

    Ok(Ready {
        ssrc: data.ssrc,
        ip: data.ip,
        port: data.port,
        modes: EncryptionModes::from_names(data.modes.iter().map(String::as_str)),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub secret_key: SessionKey,
}

#[derive(Deserialize)]
struct SessionDescriptionData {
    secret_key: [u8; SECRET_KEY_LEN],
}

pub fn decode_session_description(d: &RawValue) -> GatewayResult<SessionDescription> {
    let data: SessionDescriptionData = serde_json::from_str(d.get())
        .map_err(|e| GatewayError::malformed("session_description", e))?;

    Ok(SessionDescription {
        secret_key: SessionKey::new(data.secret_key),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub nonce: i32,
}

pub fn decode_heartbeat_ack(d: &RawValue) -> GatewayResult<HeartbeatAck> {
    let nonce: i32 =
        serde_json::from_str(d.get()).map_err(|e| GatewayError::malformed("heartbeat_ack", e))?;
    Ok(HeartbeatAck { nonce })
}

#[derive(Serialize)]
struct Outgoing<T> {
    op: u8,
    d: T,
}

fn encode<T: Serialize>(op: Opcode, d: T, context: &'static str) -> GatewayResult<String> {
    serde_json::to_string(&Outgoing { op: op.into(), d })
        .map_err(|e| GatewayError::malformed(context, e))
}

pub fn encode_heartbeat(nonce: i32) -> GatewayResult<String> {
    encode(Opcode::Heartbeat, nonce, "heartbeat")
}

#[derive(Serialize)]
struct IdentifyData<'a> {
    server_id: String,
    user_id: String,
    session_id: &'a str,
    token: &'a str,
}

pub fn encode_identify(credentials: &Credentials) -> GatewayResult<String> {
    encode(
        Opcode::Identify,
        IdentifyData {
            server_id: credentials.guild_id.to_string(),
            user_id: credentials.user_id.to_string(),
            session_id: &credentials.session_id,
            token: credentials.token.expose_secret(),
        },
        "identify",
    )
}

#[derive(Serialize)]
struct SelectProtocolData {
    protocol: &'static str,
    data: ProtocolData,
}

#[derive(Serialize)]
struct ProtocolData {
    address: String,
    port: u16,
    mode: &'static str,
}

/// Fails with [`GatewayError::UnsupportedMode`] for anything but lite mode,
/// the only mode the media sender implements.
pub fn encode_select_protocol(
    local_endpoint: SocketAddr,
    mode: EncryptionMode,
) -> GatewayResult<String> {
    if mode != EncryptionMode::XSalsa20Poly1305Lite {
        return Err(GatewayError::UnsupportedMode(mode.flag()));
    }

    encode(
        Opcode::SelectProtocol,
        SelectProtocolData {
            protocol: "udp",
            data: ProtocolData {
                address: local_endpoint.ip().to_string(),
                port: local_endpoint.port(),
                mode: mode.as_str(),
            },
        },
        "select_protocol",
    )
}

#[derive(Serialize)]
struct SpeakingData {
    speaking: bool,
    delay: i32,
    ssrc: u32,
}

pub fn encode_speaking(speaking: bool, delay: i32, ssrc: u32) -> GatewayResult<String> {
    encode(
        Opcode::Speaking,
        SpeakingData {
            speaking,
            delay,
            ssrc,
        },
        "speaking",
    )
}
