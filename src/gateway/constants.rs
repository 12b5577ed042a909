/// Protocol version appended to bare signaling hosts.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Opus clock rate; RTP timestamps count samples at this rate.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

// ── IP discovery ─────────────────────────────────────────────────────────────

/// Size of both the discovery request and its response.
pub const DISCOVERY_PACKET_SIZE: usize = 70;

/// Byte range of the NUL-padded ASCII address in a discovery response.
pub const DISCOVERY_ADDRESS_RANGE: std::ops::Range<usize> = 4..68;

/// Byte range of the little-endian port in a discovery response.
pub const DISCOVERY_PORT_RANGE: std::ops::Range<usize> = 68..70;

// ── RTP ──────────────────────────────────────────────────────────────────────

pub const RTP_HEADER_LEN: usize = 12;
pub const RTP_VERSION_BYTE: u8 = 0x80;
pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;

// ── Encryption ───────────────────────────────────────────────────────────────

pub const SECRET_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Nonce bytes actually transmitted in lite mode; the rest are zero.
pub const LITE_NONCE_LEN: usize = 4;

/// Header + tag + nonce suffix + the largest Opus packet we expect.
pub const UDP_PACKET_BUF_CAPACITY: usize = RTP_HEADER_LEN + TAG_LEN + LITE_NONCE_LEN + 1_500;

// ── Sender pacing ────────────────────────────────────────────────────────────

/// Opus packet sent when the encoder falls behind: CELT fullband, 20 ms.
pub const SILENCE_FRAME: [u8; 5] = [0xF8, 0xFF, 0xFE, 0x00, 0x00];

/// Consecutive empty reads tolerated before a silence frame is sent.
pub const MAX_UNDERRUNS: u32 = 3;

/// Delay before re-polling the input after an empty read (ms).
pub const UNDERRUN_RETRY_MS: u64 = 1;

/// Pacing used when a frame is dropped before its duration is known (ms).
pub const FALLBACK_FRAME_MS: u64 = 20;

// ── Reconnect ────────────────────────────────────────────────────────────────

/// Maximum exponent applied by the reconnect backoff.
pub const BACKOFF_MAX_EXPONENT: u32 = 3;

/// Timeout (ms) allowed for the sender task to hand itself back on stop.
pub const SENDER_SHUTDOWN_MS: u64 = 500;
