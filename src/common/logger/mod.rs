use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;

pub use formatter::*;

use crate::configs::LoggingConfig;

/// Builds the filter directive from the configured level and extra filters.
/// `tungstenite` is capped at `warn` unless the filters say otherwise.
pub fn filter_directive(logging: Option<&LoggingConfig>) -> String {
    let level = logging
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");
    let filters = logging.and_then(|l| l.filters.as_deref()).unwrap_or("");

    if filters.is_empty() {
        format!("{},tungstenite=warn", level)
    } else {
        format!("{},tungstenite=warn,{}", level, filters)
    }
}

pub fn init(logging: Option<&LoggingConfig>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(logging)));

    let ansi = logging.and_then(|l| l.ansi).unwrap_or(true);
    let stdout_layer = fmt::layer()
        .event_format(CustomFormatter::new(ansi))
        .with_ansi(ansi);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_is_info() {
        assert_eq!(filter_directive(None), "info,tungstenite=warn");
    }

    #[test]
    fn configured_filters_are_appended() {
        let logging = LoggingConfig {
            level: Some("debug".into()),
            filters: Some("voxlink::gateway=trace".into()),
            ansi: None,
        };
        assert_eq!(
            filter_directive(Some(&logging)),
            "debug,tungstenite=warn,voxlink::gateway=trace"
        );
    }
}
