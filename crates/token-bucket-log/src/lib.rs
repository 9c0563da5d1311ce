//! Tracing subscriber setup for programs embedding a token bucket.
//!
//! The `token-bucket` library only emits events. Binaries, benches and
//! tests call [`init`] (or [`init_for_tests`]) once to see them.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable names.
pub mod vars {
    pub const LOG_LEVEL: &str = "TOKEN_BUCKET_LOG_LEVEL";
    pub const LOG_FORMAT: &str = "TOKEN_BUCKET_LOG_FORMAT";
    pub const LOG_SOURCE: &str = "TOKEN_BUCKET_LOG_SOURCE";
    pub const LOG_SPANS: &str = "TOKEN_BUCKET_LOG_SPANS";
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Minimum log level.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Include source file and line.
    pub source_location: bool,
    /// Include span open/close events.
    pub span_events: bool,
    /// Raw `RUST_LOG` directives, used only when no explicit level was set.
    pub directives: Option<String>,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON structured format.
    Json,
}

impl LogConfig {
    /// Create config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create config resolving variables through `lookup`.
    ///
    /// `TOKEN_BUCKET_LOG_LEVEL` wins over `RUST_LOG`. Without it,
    /// `RUST_LOG` is kept as filter directives. Unknown values keep the
    /// default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup(vars::LOG_LEVEL) {
            if let Some(l) = LogLevel::parse(&level) {
                config.level = l;
            }
        } else if let Some(directives) = lookup(vars::RUST_LOG) {
            if let Some(l) = LogLevel::parse(&directives) {
                config.level = l;
            }
            config.directives = Some(directives);
        }

        if let Some(format) = lookup(vars::LOG_FORMAT) {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        let flag = |var: &str| {
            lookup(var)
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false)
        };
        config.source_location = flag(vars::LOG_SOURCE);
        config.span_events = flag(vars::LOG_SPANS);

        config
    }

    /// Filter directives `init` installs.
    pub fn filter_directives(&self) -> &str {
        self.directives
            .as_deref()
            .unwrap_or_else(|| self.level.as_directive())
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Convenience macros re-exported from tracing.
pub use tracing::{debug, error, info, trace, warn};

/// Install the global subscriber. Fails if one is already installed.
///
/// The filter comes from `config` alone; the process environment is only
/// read by [`LogConfig::from_env`].
pub fn init(config: LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location)
                    .with_span_events(config.span_events()),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location)
                    .with_span_events(config.span_events()),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location)
                    .with_span_events(config.span_events()),
            )
            .try_init(),
    };

    result.map_err(|e| LogError::InitError(e.to_string()))
}

/// Install a test-writer subscriber at `trace` level. Safe to call from
/// every test; only the first call has an effect.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("trace"))
        .with_test_writer()
        .try_init();
}

/// Logging errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to initialize logging: {0}")]
    InitError(String),
}
