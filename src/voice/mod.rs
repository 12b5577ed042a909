pub mod manager;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::VoiceManager;
pub use session::VoiceSession;
