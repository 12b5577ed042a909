//! Fixed-format UDP exchange used to learn the externally visible address of
//! the media socket.

use std::net::{IpAddr, SocketAddr};

use crate::{
    common::errors::{GatewayError, GatewayResult},
    gateway::constants::{DISCOVERY_ADDRESS_RANGE, DISCOVERY_PACKET_SIZE, DISCOVERY_PORT_RANGE},
};

pub fn encode_discovery_request() -> [u8; DISCOVERY_PACKET_SIZE] {
    [0u8; DISCOVERY_PACKET_SIZE]
}

/// Reads the NUL-padded address at `[4, 68)` and the little-endian port at
/// `[68, 70)`.
pub fn decode_discovery_response(packet: &[u8]) -> GatewayResult<SocketAddr> {
    let packet: &[u8; DISCOVERY_PACKET_SIZE] = packet.try_into().map_err(|_| {
        GatewayError::DiscoveryFailure(format!(
            "expected {} byte response, got {}",
            DISCOVERY_PACKET_SIZE,
            packet.len()
        ))
    })?;

    let raw_ip = &packet[DISCOVERY_ADDRESS_RANGE];
    let end = raw_ip.iter().position(|&b| b == 0).unwrap_or(raw_ip.len());
    let ip_str = std::str::from_utf8(&raw_ip[..end])
        .map_err(|e| GatewayError::DiscoveryFailure(format!("address is not ascii: {e}")))?;
    let ip: IpAddr = ip_str
        .trim()
        .parse()
        .map_err(|_| GatewayError::DiscoveryFailure(format!("unparsable address {ip_str:?}")))?;

    let port_bytes = &packet[DISCOVERY_PORT_RANGE];
    let port = u16::from_le_bytes([port_bytes[0], port_bytes[1]]);

    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
pub(crate) fn encode_discovery_response(addr: SocketAddr) -> [u8; DISCOVERY_PACKET_SIZE] {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    let ip = addr.ip().to_string();
    packet[DISCOVERY_ADDRESS_RANGE.start..DISCOVERY_ADDRESS_RANGE.start + ip.len()]
        .copy_from_slice(ip.as_bytes());
    packet[DISCOVERY_PORT_RANGE].copy_from_slice(&addr.port().to_le_bytes());
    packet
}
