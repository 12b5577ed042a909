pub mod mode;
pub mod opcodes;
pub mod payloads;

pub use mode::{EncryptionMode, EncryptionModes};
pub use opcodes::Opcode;
pub use payloads::*;
