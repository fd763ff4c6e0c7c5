use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    Layer,
};

/// Target used by the transaction logger; always shown at INFO.
pub const TX_LOG_TARGET: &str = "tx_log";

/// Installs the global subscriber: hourly-rolling file under `log_dir` plus
/// stdout. Returns `None` if a subscriber is already installed.
///
/// The returned guard flushes the file writer and must be kept alive.
pub fn setup_logger(log_dir: &str, colors: bool) -> Option<WorkerGuard> {
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::hourly(log_dir, "farm");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: INFO for tx_log, WARN for others
    let file_filter = tracing_subscriber::filter::Targets::new()
        .with_target(TX_LOG_TARGET, tracing::Level::INFO)
        .with_default(tracing::Level::WARN);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    // Console layer: INFO for tx_log, ERROR for others
    let console_filter = tracing_subscriber::filter::Targets::new()
        .with_target(TX_LOG_TARGET, tracing::Level::INFO)
        .with_default(tracing::Level::ERROR);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(colors)
        .event_format(TerminalFormatter { colors })
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .ok()?;

    Some(guard)
}

// --- Formatters ---

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

fn event_message(event: &Event<'_>) -> String {
    let mut visitor = MessageVisitor {
        message: String::new(),
    };
    event.record(&mut visitor);
    visitor.message
}

/// Paints the first status keyword found in `msg`.
pub(crate) fn colorize(msg: &str) -> String {
    let palette = [
        ("SUCCESS", Color::LightGreen),
        ("ERROR", Color::LightRed),
        ("WARNING", Color::Yellow),
        ("INFO", Color::Cyan),
    ];
    for (keyword, color) in palette {
        if msg.contains(keyword) {
            let painted = Style::new().fg(color).bold().paint(keyword);
            return msg.replacen(keyword, &painted.to_string(), 1);
        }
    }
    msg.to_string()
}

pub struct TerminalFormatter {
    colors: bool,
}

impl<S, N> FormatEvent<S, N> for TerminalFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let msg = event_message(event);
        if self.colors {
            writeln!(writer, "{}", colorize(&msg))
        } else {
            writeln!(writer, "{}", msg)
        }
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = event.metadata().level();

        write!(writer, "{} [{}] ", timestamp, level)?;
        writeln!(writer, "{}", event_message(event))
    }
}
