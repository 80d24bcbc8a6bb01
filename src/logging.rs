use std::env;
use std::io::IsTerminal;

use anyhow::Context as _;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{DefaultFields, Format, Full, Json, JsonFields, Writer};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Chooses JSON or plaintext event formatting without dynamic dispatch
enum JsonOrNot {
    Not(Format<Full, SystemTime>),
    Json(Format<Json, SystemTime>),
}

impl<S, N> FormatEvent<S, N> for JsonOrNot
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        match self {
            JsonOrNot::Not(f) => f.format_event(ctx, writer, event),
            JsonOrNot::Json(f) => f.format_event(ctx, writer, event),
        }
    }
}

/// Keeps the non-blocking stderr writer alive; logs are flushed when dropped
pub struct FlushGuard {
    _stderr: tracing_appender::non_blocking::WorkerGuard,
}

/// Installs the global tracing subscriber: a level filter and a stderr
/// logging layer, either plaintext or structured (JSON)
///
/// # Errors
///
/// Returns an error if a global subscriber is already set
pub fn configure_tracing(
    use_structured_logging: bool,
    log_level: tracing::Level,
) -> anyhow::Result<FlushGuard> {
    let reg = tracing_subscriber::Registry::default().with(get_log_level_filter(log_level));
    let stderr = std::io::stderr();
    let ansi = stderr.is_terminal();
    let (stderr, stderr_guard) = tracing_appender::non_blocking(stderr);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(stderr)
        .with_ansi(ansi);

    let dispatch: tracing::Dispatch = if use_structured_logging {
        reg.with(
            fmt.event_format(JsonOrNot::Json(Format::default().json()))
                .fmt_fields(JsonFields::new()),
        )
        .into()
    } else {
        reg.with(
            fmt.event_format(JsonOrNot::Not(Format::default()))
                .fmt_fields(DefaultFields::new()),
        )
        .into()
    };
    tracing::dispatcher::set_global_default(dispatch)
        .context("failed to set global tracing subscriber")?;

    Ok(FlushGuard {
        _stderr: stderr_guard,
    })
}

fn get_log_level_filter(log_level: tracing::Level) -> EnvFilter {
    // SAFETY: We can unwrap here because we control all inputs
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .parse("")
        .unwrap()
        .add_directive("hyper=info".parse().unwrap())
        .add_directive("tower_http=info".parse().unwrap());

    // Allow RUST_LOG to override the other directives
    if let Ok(rust_log) = env::var("RUST_LOG") {
        match rust_log
            .split(',')
            .filter(|d| !d.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(directives) => {
                for directive in directives {
                    filter = filter.add_directive(directive);
                }
            }
            Err(err) => {
                eprintln!("ERROR: Ignoring invalid RUST_LOG directive: {err}");
            }
        }
    }
    filter
}
