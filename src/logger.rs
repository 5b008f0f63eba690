//! Tracing stack initialization from the `logger` config subtree.
//!
//! ```yaml
//! logger:
//!   enable: true
//!   level: debug
//!   format: compact
//!   file:
//!     dir: ./logs
//!     rotation: daily
//! ```
//!
//! Filter precedence: `RUST_LOG` always wins; a configured `filter`
//! directive comes next; otherwise this crate and the application both log
//! at the configured level.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Verbosity threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Output shape of emitted events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    fn layer<W>(self, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let base = fmt::Layer::default().with_writer(writer).with_ansi(ansi);
        match self {
            Self::Compact => base.compact().boxed(),
            Self::Pretty => base.pretty().boxed(),
            Self::Json => base.json().boxed(),
        }
    }
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl LogRotation {
    fn rolling(self) -> tracing_appender::rolling::Rotation {
        match self {
            Self::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            Self::Daily => tracing_appender::rolling::Rotation::DAILY,
            Self::Never => tracing_appender::rolling::Rotation::NEVER,
        }
    }
}

/// Rolled file output. Writes go through a non-blocking worker whose flush
/// guard lives for the rest of the process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileLogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Rolled files kept before the oldest is deleted.
    #[serde(default = "default_keep_files")]
    pub keep_files: usize,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_keep_files() -> usize {
    7
}

/// The `logger` config subtree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    /// Emit events to stdout.
    pub enable: bool,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
    /// Full tracing filter directive, replacing the level-based default.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub file: Option<FileLogConfig>,
}

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the tracing subscriber described by `config`. A second call
/// (multiple servers in one process) keeps the first subscriber.
pub fn init(config: &LogConfig, app_name: &str) {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable {
        layers.push(config.format.layer(std::io::stdout, true));
    }

    if let Some(file) = &config.file {
        let appender = tracing_appender::rolling::Builder::default()
            .rotation(file.rotation.rolling())
            .max_log_files(file.keep_files)
            .filename_prefix(app_name)
            .build(&file.dir)
            .expect("log file appender initialization failed");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(config.format.layer(writer, false));
    }

    if layers.is_empty() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match &config.filter {
            Some(custom) => EnvFilter::try_new(custom),
            None => EnvFilter::try_new(format!(
                "{crate_name}={level},{app_name}={level}",
                crate_name = env!("CARGO_CRATE_NAME"),
                level = config.level.directive(),
            )),
        })
        .expect("log filter initialization failed");

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
}
