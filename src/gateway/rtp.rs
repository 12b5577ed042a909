use std::time::Duration;

use crate::gateway::constants::{
    OPUS_SAMPLE_RATE, RTP_HEADER_LEN, RTP_OPUS_PAYLOAD_TYPE, RTP_VERSION_BYTE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Builds the 12-byte RTP header: `80 78 | seq BE | timestamp BE | ssrc BE`.
pub fn encode_media_header(sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut header = [0u8; RTP_HEADER_LEN];
    header[0] = RTP_VERSION_BYTE;
    header[1] = RTP_OPUS_PAYLOAD_TYPE;
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

pub fn decode_media_header(packet: &[u8]) -> Option<MediaHeader> {
    let header: &[u8; RTP_HEADER_LEN] = packet.get(..RTP_HEADER_LEN)?.try_into().ok()?;
    if header[0] != RTP_VERSION_BYTE || header[1] != RTP_OPUS_PAYLOAD_TYPE {
        return None;
    }

    Some(MediaHeader {
        sequence: u16::from_be_bytes([header[2], header[3]]),
        timestamp: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        ssrc: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
    })
}

/// Number of 48 kHz samples carried by an Opus packet, read from its TOC
/// byte (RFC 6716 §3.1) and, for code 3 packets, the frame count byte.
pub fn opus_sample_count(packet: &[u8]) -> Option<u32> {
    let toc = *packet.first()?;
    let config = toc >> 3;

    let per_frame = match config {
        0..=11 => [480, 960, 1920, 2880][(config % 4) as usize],
        12..=15 => [480, 960][(config % 2) as usize],
        _ => [120, 240, 480, 960][(config % 4) as usize],
    };

    let frames = match toc & 0b11 {
        0 => 1,
        1 | 2 => 2,
        _ => match packet.get(1)? & 0x3F {
            0 => return None,
            n => u32::from(n),
        },
    };

    Some(per_frame * frames)
}

/// Playout duration for the standard Opus packet sizes; `None` for anything
/// else.
pub fn frame_duration(samples: u32) -> Option<Duration> {
    match samples {
        120 | 240 | 480 | 960 | 1_920 | 2_880 | 3_840 | 4_800 | 5_760 => Some(Duration::from_micros(
            u64::from(samples) * 1_000_000 / u64::from(OPUS_SAMPLE_RATE),
        )),
        _ => None,
    }
}
