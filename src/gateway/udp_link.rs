use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    net::UdpSocket,
    sync::watch,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    common::types::GuildId,
    gateway::{
        constants::{
            FALLBACK_FRAME_MS, MAX_UNDERRUNS, SILENCE_FRAME, UDP_PACKET_BUF_CAPACITY,
            UNDERRUN_RETRY_MS,
        },
        encryption::LiteCipher,
        events::{DiagnosticCategory, EventEmitter},
        input::AudioReader,
        params::{SessionKey, SessionParameters},
        rtp::{encode_media_header, frame_duration, opus_sample_count},
    },
};

/// Packet counters, shared with whoever owns the sender.
#[derive(Debug, Default)]
pub struct SenderStats {
    frames_sent: AtomicU64,
    frames_silenced: AtomicU64,
    frames_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderStatsSnapshot {
    pub frames_sent: u64,
    /// Silence frames sent in place of missing audio (also counted as sent).
    pub frames_silenced: u64,
    pub frames_dropped: u64,
}

impl SenderStats {
    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_silenced: self.frames_silenced.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// What one send cycle did and when the next one is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// A packet went out; next cycle after the frame's playout time.
    Sent(Duration),
    /// Input was empty; poll again shortly.
    Retry(Duration),
    /// The frame was dropped without advancing the counters.
    Skip(Duration),
    /// The frame duration is unknown. Nothing more will be sent.
    Halt,
}

/// The media sender: paces encoded frames from the input channel out to the
/// relay as encrypted RTP packets.
///
/// Pacing follows each frame's own duration instead of a fixed tick, so the
/// RTP timestamp always matches real playout time.
pub struct MediaSender {
    guild_id: GuildId,
    socket: Arc<UdpSocket>,
    input: AudioReader,
    params: watch::Receiver<SessionParameters>,
    events: EventEmitter,
    stats: Arc<SenderStats>,
    sequence: u16,
    timestamp: u32,
    underruns: u32,
    cipher: Option<(SessionKey, LiteCipher)>,
    packet_buf: Vec<u8>,
}

impl MediaSender {
    pub fn new(
        guild_id: GuildId,
        socket: Arc<UdpSocket>,
        input: AudioReader,
        params: watch::Receiver<SessionParameters>,
        events: EventEmitter,
    ) -> Self {
        Self {
            guild_id,
            socket,
            input,
            params,
            events,
            stats: Arc::new(SenderStats::default()),
            sequence: 0,
            timestamp: 0,
            underruns: 0,
            cipher: None,
            packet_buf: Vec::with_capacity(UDP_PACKET_BUF_CAPACITY),
        }
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    /// Runs one send cycle without waiting on anything.
    pub fn cycle(&mut self) -> Cycle {
        let (frame, silence) = match self.input.try_read_frame().filter(|f| !f.is_empty()) {
            Some(frame) => {
                self.underruns = 0;
                (frame, false)
            }
            None => {
                self.underruns += 1;
                if self.underruns < MAX_UNDERRUNS {
                    return Cycle::Retry(Duration::from_millis(UNDERRUN_RETRY_MS));
                }
                self.underruns = 0;
                (bytes::Bytes::from_static(&SILENCE_FRAME), true)
            }
        };

        let samples = opus_sample_count(&frame);
        let duration = samples.and_then(frame_duration);

        let Some(target) = self.params.borrow().transmit_target() else {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Cycle::Skip(
                duration.unwrap_or(Duration::from_millis(FALLBACK_FRAME_MS)),
            );
        };

        let (Some(samples), Some(duration)) = (samples, duration) else {
            let message = format!(
                "unrecognised opus frame ({} bytes, toc {:#04x}); sender halted",
                frame.len(),
                frame[0]
            );
            error!("[{}] {}", self.guild_id, message);
            self.events
                .diagnostic(self.guild_id, DiagnosticCategory::Media, message);
            return Cycle::Halt;
        };

        if self.cipher.as_ref().is_none_or(|(key, _)| *key != target.session_key) {
            debug!("[{}] Session key installed in sender", self.guild_id);
            let cipher = LiteCipher::new(&target.session_key);
            self.cipher = Some((target.session_key.clone(), cipher));
        }
        let Some((_, cipher)) = &self.cipher else {
            return Cycle::Skip(duration);
        };

        self.packet_buf.clear();
        self.packet_buf.extend_from_slice(&encode_media_header(
            self.sequence,
            self.timestamp,
            target.ssrc,
        ));

        if let Err(e) = cipher.seal_into(&frame, &mut self.packet_buf) {
            warn!("[{}] Dropping frame: {}", self.guild_id, e);
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Cycle::Skip(duration);
        }

        match self.socket.try_send_to(&self.packet_buf, target.relay_endpoint) {
            Ok(_) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                if silence {
                    self.stats.frames_silenced.fetch_add(1, Ordering::Relaxed);
                }
                trace!(
                    "[{}] Sent seq={} ts={} ({} bytes)",
                    self.guild_id,
                    self.sequence,
                    self.timestamp,
                    self.packet_buf.len()
                );
            }
            Err(e) => {
                warn!(
                    "[{}] UDP send to {} failed: {}",
                    self.guild_id, target.relay_endpoint, e
                );
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);
        Cycle::Sent(duration)
    }

    /// Sends until `cancel` fires, then hands itself back so a restarted
    /// session keeps its counters.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let mut deadline = Instant::now();

        loop {
            let delay = match self.cycle() {
                Cycle::Sent(d) | Cycle::Retry(d) | Cycle::Skip(d) => d,
                Cycle::Halt => {
                    cancel.cancelled().await;
                    return self;
                }
            };

            deadline += delay;
            let now = Instant::now();
            if deadline < now {
                deadline = now;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self,
                _ = sleep_until(deadline) => {}
            }
        }
    }
}
