use std::{net::SocketAddr, time::Duration};

use tokio::{net::UdpSocket, time::Instant};
use tracing::debug;

use crate::{
    common::errors::{GatewayError, GatewayResult},
    gateway::{
        constants::DISCOVERY_PACKET_SIZE,
        discovery::{decode_discovery_response, encode_discovery_request},
    },
};

/// Sends the 70-byte request to the relay and decodes the address it saw us
/// at. Datagrams from anyone but the relay are ignored until `timeout`.
pub async fn discover_ip(
    socket: &UdpSocket,
    relay: SocketAddr,
    timeout: Duration,
) -> GatewayResult<SocketAddr> {
    let request = encode_discovery_request();
    socket
        .send_to(&request, relay)
        .await
        .map_err(|e| GatewayError::DiscoveryFailure(format!("send to {relay} failed: {e}")))?;

    // One spare byte so oversized responses are detected instead of truncated.
    let mut buf = [0u8; DISCOVERY_PACKET_SIZE + 1];
    let deadline = Instant::now() + timeout;

    loop {
        let (n, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await
        {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                return Err(GatewayError::DiscoveryFailure(format!("receive failed: {e}")));
            }
            Err(_) => {
                return Err(GatewayError::DiscoveryFailure(format!(
                    "no response from {relay} within {timeout:?}"
                )));
            }
        };

        if from != relay {
            debug!("Ignoring {} byte datagram from {} during discovery", n, from);
            continue;
        }

        return decode_discovery_response(&buf[..n]);
    }
}
