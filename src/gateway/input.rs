//! Byte channel between the external encoder and the media sender.
//!
//! The encoder writes `u16-LE length || opus payload` frames; chunk
//! boundaries do not need to line up with frame boundaries. The channel is
//! bounded, so a fast encoder is back-pressured by `write_*`.

use bytes::{Bytes, BytesMut};
use flume::{Receiver, Sender, TryRecvError};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use tracing::warn;

use crate::common::errors::{GatewayError, GatewayResult};

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .little_endian()
        .max_frame_length(u16::MAX as usize)
        .new_codec()
}

pub fn audio_channel(capacity: usize) -> (AudioWriter, AudioReader) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (
        AudioWriter { tx },
        AudioReader {
            rx,
            buf: BytesMut::new(),
            codec: frame_codec(),
            closed: false,
        },
    )
}

#[derive(Clone)]
pub struct AudioWriter {
    tx: Sender<Bytes>,
}

impl AudioWriter {
    fn frame(opus: &[u8]) -> GatewayResult<Bytes> {
        let mut out = BytesMut::with_capacity(opus.len() + 2);
        frame_codec()
            .encode(Bytes::copy_from_slice(opus), &mut out)
            .map_err(|e| GatewayError::malformed("audio frame", e))?;
        Ok(out.freeze())
    }

    /// Prefixes `opus` with its length and queues it, waiting for room.
    pub async fn write_frame(&self, opus: &[u8]) -> GatewayResult<()> {
        let framed = Self::frame(opus)?;
        self.tx
            .send_async(framed)
            .await
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Queues a frame without waiting. Returns `false` when the channel is
    /// full.
    pub fn try_write_frame(&self, opus: &[u8]) -> GatewayResult<bool> {
        let framed = Self::frame(opus)?;
        match self.tx.try_send(framed) {
            Ok(()) => Ok(true),
            Err(flume::TrySendError::Full(_)) => Ok(false),
            Err(flume::TrySendError::Disconnected(_)) => Err(GatewayError::NotConnected),
        }
    }

    /// Queues bytes that already carry length prefixes.
    pub async fn write_raw(&self, bytes: Bytes) -> GatewayResult<()> {
        self.tx
            .send_async(bytes)
            .await
            .map_err(|_| GatewayError::NotConnected)
    }
}

pub struct AudioReader {
    rx: Receiver<Bytes>,
    buf: BytesMut,
    codec: LengthDelimitedCodec,
    closed: bool,
}

impl AudioReader {
    /// Returns the next complete frame if one is already buffered, without
    /// waiting. Partial frames stay buffered for the next call.
    pub fn try_read_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(frame)) => return Some(frame.freeze()),
                Ok(None) => {}
                Err(e) => {
                    warn!("Discarding undecodable audio input: {}", e);
                    self.buf.clear();
                    self.codec = frame_codec();
                }
            }

            match self.rx.try_recv() {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        self.closed = true;
                        warn!("Audio input closed by encoder");
                    }
                    return None;
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
