use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Full,
    Compact,
    Json,
}

/// Logging configuration shared by all binaries.
#[derive(Clone, Debug, Default, Parser)]
pub struct Config {
    /// Output format for log events.
    #[clap(long = "log-format", env = "TIMELOCK_LOG_FORMAT", value_enum)]
    pub format: Option<LogFormat>,

    /// Whether to colorize log output.
    #[clap(long = "log-colors", env = "TIMELOCK_LOG_COLORS")]
    pub colors: Option<bool>,
}

impl Config {
    /// Install the global tracing subscriber.
    ///
    /// Filtering is controlled by `RUST_LOG`, defaulting to `info`. Calling
    /// this more than once is a no-op, so tests can call it freely.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(self.colors.unwrap_or(true));
        let res = match self.format {
            Some(LogFormat::Json) => builder.json().try_init(),
            Some(LogFormat::Compact) => builder.compact().try_init(),
            _ => builder.try_init(),
        };
        if res.is_err() {
            tracing::debug!("logging already initialized");
        }
    }
}
