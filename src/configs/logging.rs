use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// Base level, `info` when unset. `RUST_LOG` overrides it.
    pub level: Option<String>,
    /// Extra `EnvFilter` directives appended after the level.
    pub filters: Option<String>,
    /// Colour output; on by default.
    pub ansi: Option<bool>,
}
