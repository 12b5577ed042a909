use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc::UnboundedReceiver,
};
use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::Message};
use tracing::{debug, info};

use super::{
    VoiceGateway,
    types::{SessionOutcome, outcome_for_close},
};
use crate::common::errors::GatewayResult;

/// Moves inbound text frames into the dispatch queue until the relay closes
/// the socket or it fails.
pub(super) async fn receive_pump<S>(
    gateway: &VoiceGateway,
    mut read: SplitStream<WebSocketStream<S>>,
    inbound: flume::Sender<String>,
) -> GatewayResult<SessionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                if inbound.send(text.as_str().to_owned()).is_err() {
                    return Ok(SessionOutcome::Reconnect);
                }
            }
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|cf| (u16::from(cf.code), cf.reason.as_str().to_owned()))
                    .unwrap_or((1000u16, "No reason".into()));

                info!(
                    "[{}] WS closed: code={}, reason='{}'",
                    gateway.guild_id(),
                    code,
                    reason
                );
                gateway.emit_close(code, reason);
                return Ok(outcome_for_close(code));
            }
            Message::Binary(bin) => {
                debug!(
                    "[{}] Ignoring {} byte binary frame",
                    gateway.guild_id(),
                    bin.len()
                );
            }
            _ => {}
        }
    }

    debug!("[{}] WS stream ended", gateway.guild_id());
    gateway.emit_close(1000, "Stream ended".into());
    Ok(SessionOutcome::Reconnect)
}

/// Writes queued messages in FIFO order, one socket write per message.
pub(super) async fn send_pump<S>(
    mut write: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: UnboundedReceiver<Message>,
) -> GatewayResult<SessionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        write.send(msg).await?;
    }
    Ok(SessionOutcome::Reconnect)
}
