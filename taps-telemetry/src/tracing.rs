use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::{self, Write};
use std::panic::PanicHookInfo;
use std::sync::{Once, OnceLock};

use taps_config::Environment;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field naming the sub-command that wrote a log line.
const COMMAND_FIELD: &str = "command";

const LOG_DIR: &str = "logs";

const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] io::Error),
}

/// Keeps the file writer alive. Drop it last so buffered lines reach the log file.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

static COMMAND: OnceLock<String> = OnceLock::new();

/// Enables console logging in tests when `ENABLE_TRACING` is set:
///
/// ```bash
/// ENABLE_TRACING=1 cargo test resumes_without_gaps
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            Environment::Dev.set();
            let _log_flusher = init_tracing("test", None).expect("Failed to initialize tracing");
        }
    });
}

/// Installs the global subscriber.
///
/// In production JSON lines go to daily rotated files named after `app_name`, each tagged
/// with `command` when one is given. Otherwise compact lines go to the console.
pub fn init_tracing(app_name: &str, command: Option<&str>) -> Result<LogFlusher, TracingError> {
    if let Some(command) = command {
        let _ = COMMAND.set(command.to_string());
    }

    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let log_flusher = if Environment::load()?.is_prod() {
        init_file_tracing(filter, app_name)?
    } else {
        init_console_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn init_file_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)?;
    let (appender, guard) = tracing_appender::non_blocking(appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);
    let layer = fmt::layer()
        .event_format(format)
        .with_writer(move || CommandWriter {
            inner: appender.make_writer(),
        })
        .json()
        .with_current_span(true)
        .with_span_list(true);

    set_global_default(Registry::default().with(filter).with(layer))?;

    Ok(LogFlusher::Flusher(guard))
}

fn init_console_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .with_target(false)
        .compact();
    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Adds the [`COMMAND_FIELD`] to every JSON object written through it.
struct CommandWriter<W> {
    inner: W,
}

impl<W: Write> Write for CommandWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match COMMAND.get().and_then(|command| tag_line(buf, command)) {
            Some(tagged) => self.inner.write_all(&tagged).map(|()| buf.len()),
            None => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Returns `line` with the command added, or `None` when it is not a JSON object or
/// already names a command.
fn tag_line(line: &[u8], command: &str) -> Option<Vec<u8>> {
    let serde_json::Value::Object(mut object) = serde_json::from_slice(line).ok()? else {
        return None;
    };
    if object.contains_key(COMMAND_FIELD) {
        return None;
    }
    object.insert(COMMAND_FIELD.to_string(), command.into());

    let mut tagged = serde_json::to_vec(&object).ok()?;
    if line.ends_with(b"\n") {
        tagged.push(b'\n');
    }

    Some(tagged)
}

/// Logs panics through tracing, then runs the previous hook.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        prev_hook(info);
    }));
}

fn log_panic(info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let backtrace = match backtrace.status() {
        BacktraceStatus::Captured => backtrace.to_string(),
        _ => "run with RUST_BACKTRACE=1 to display backtraces".to_string(),
    };

    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");

    tracing::error!(
        panic.payload = payload,
        panic.location = info.location().map(tracing::field::display),
        panic.backtrace = backtrace,
        "a panic occurred",
    );
}
