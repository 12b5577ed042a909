use std::fmt;

use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        FmtContext,
        format::{FormatEvent, FormatFields, Writer},
    },
    registry::LookupSpan,
};

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

fn level_colour(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[1;31m",
        Level::WARN => "\x1b[1;33m",
        Level::INFO => "\x1b[1;32m",
        Level::DEBUG => "\x1b[1;34m",
        Level::TRACE => "\x1b[1;35m",
    }
}

/// `[timestamp] LEVEL module:line > message`, with the crate name dropped
/// from our own targets.
pub struct CustomFormatter {
    ansi: bool,
}

impl CustomFormatter {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }

    fn paint<'a>(&self, style: &'a str) -> &'a str {
        if self.ansi { style } else { "" }
    }
}

fn short_target(target: &str) -> &str {
    target
        .strip_prefix(concat!(env!("CARGO_CRATE_NAME"), "::"))
        .unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let (dim, reset) = (self.paint(DIM), self.paint(RESET));

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        match now.format(TIMESTAMP) {
            Ok(ts) => write!(writer, "{dim}[{ts}]{reset} ")?,
            Err(_) => write!(writer, "{dim}[-]{reset} ")?,
        }

        write!(
            writer,
            "{}{:<5}{reset} ",
            self.paint(level_colour(meta.level())),
            meta.level().as_str()
        )?;

        write!(writer, "{dim}{}", short_target(meta.target()))?;
        if let Some(line) = meta.line() {
            write!(writer, ":{line}")?;
        }
        write!(writer, "{reset} > ")?;

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_targets_lose_the_crate_prefix() {
        assert_eq!(
            short_target(concat!(env!("CARGO_CRATE_NAME"), "::gateway::session")),
            "gateway::session"
        );
        assert_eq!(short_target("tungstenite::protocol"), "tungstenite::protocol");
    }
}
