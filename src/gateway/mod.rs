pub mod constants;
pub mod credentials;
pub mod discovery;
pub mod encryption;
pub mod events;
pub mod input;
pub mod params;
pub mod protocol;
pub mod rtp;
pub mod session;
pub mod state;
pub mod udp_link;

pub use credentials::Credentials;
pub use events::{DiagnosticCategory, EventEmitter, EventSender, VoiceEvent};
pub use input::{AudioReader, AudioWriter, audio_channel};
pub use params::{SessionKey, SessionParameters};
pub use session::{VoiceGateway, types::SessionOutcome};
pub use state::SessionState;
pub use udp_link::{MediaSender, SenderStats, SenderStatsSnapshot};
