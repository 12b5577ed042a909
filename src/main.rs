use std::path::PathBuf;

use bytes::BytesMut;
use clap::Parser;
use tokio::{io::AsyncReadExt, sync::mpsc};
use tracing::{error, info, warn};
use voxlink::{
    common::{
        logger,
        types::{AnyError, AnyResult},
    },
    configs::Config,
    gateway::{Credentials, EventEmitter, VoiceEvent},
    voice::VoiceSession,
};

/// Streams `u16-LE length || opus` frames from stdin to a voice relay.
#[derive(Parser, Debug)]
#[command(name = "voxlink", version, about)]
struct Args {
    /// Config file. Defaults to config.toml, then config.default.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Delay sent with the initial Speaking update, in ms.
    #[arg(long, default_value_t = 0)]
    delay: i32,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    logger::init(config.logging.as_ref());

    info!(
        "voxlink {} ({} @ {}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_BRANCH").unwrap_or("unknown"),
        option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("unknown"),
    );

    let Some(session_config) = config.session else {
        return Err("config has no [session] section".into());
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<VoiceEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "voxlink::events", "{}", json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
        }
    });

    let credentials = Credentials {
        user_id: session_config.user_id.into(),
        guild_id: session_config.guild_id.into(),
        session_id: session_config.session_id.into(),
        token: session_config.token,
    };

    let session = VoiceSession::open(
        credentials,
        session_config.endpoint,
        session_config.local_endpoint,
        config.voice,
        EventEmitter::new(Some(event_tx)),
    )
    .await?;

    session.start().await?;
    session.set_speaking(true, args.delay)?;

    let writer = session.audio_writer();
    let pump = async {
        let mut stdin = tokio::io::stdin();
        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            buf.reserve(8 * 1024);
            if stdin.read_buf(&mut buf).await? == 0 {
                return Ok::<(), AnyError>(());
            }
            writer.write_raw(buf.split().freeze()).await?;
        }
    };

    tokio::select! {
        res = pump => match res {
            Ok(()) => info!("Input ended"),
            Err(e) => error!("Input failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    let stats = session.stats();
    info!(
        "Sent {} frames ({} silence, {} dropped)",
        stats.frames_sent, stats.frames_silenced, stats.frames_dropped
    );
    session.dispose().await;
    Ok(())
}
