//! Process-wide `tracing` set-up for command line tools.
//!
//! Log verbosity comes from the `RUST_LOG` environment variable. When it is
//! unset, [LogConfig::default_directive] is used instead.

use std::path::PathBuf;

use time::{format_description::well_known::Iso8601, UtcOffset};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid filter directive \"{directive}\": {source}")]
    Directive {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("cannot determine local UTC offset: {0}")]
    Offset(#[from] time::error::ComponentRange),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set, e.g. `"info"` or
    /// `"stream_calib=debug"`.
    pub default_directive: String,
    /// Also log to this file, without ANSI colors.
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".into(),
            file: None,
            console: true,
        }
    }
}

/// Keeps logging alive. Hold it for the lifetime of `main`.
#[must_use]
#[derive(Debug)]
pub struct Guard {
    _private: (),
}

/// Log to the console with the default configuration.
pub fn init() -> Result<Guard, Error> {
    initiate_logging(&LogConfig::default())
}

/// Build the filter from `RUST_LOG`, falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> Result<EnvFilter, Error> {
    match std::env::var("RUST_LOG") {
        Ok(var) if !var.is_empty() => parse_filter(&var),
        _ => parse_filter(default_directive),
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, Error> {
    EnvFilter::try_new(directive).map_err(|source| Error::Directive {
        directive: directive.to_string(),
        source,
    })
}

/// Start logging to file and console, both optional.
pub fn initiate_logging(cfg: &LogConfig) -> Result<Guard, Error> {
    // Fixed offset of the local timezone at start-up.
    let timer = OffsetTime::new(
        UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())?,
        Iso8601::DEFAULT,
    );

    let file_layer = match &cfg.file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .with_timer(timer.clone())
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    let console_layer = cfg.console.then(|| {
        fmt::layer()
            .with_timer(timer)
            .with_writer(std::io::stderr)
            .with_ansi(!cfg!(windows))
            .with_target(true)
    });

    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(env_filter(&cfg.default_directive)?);
    tracing::subscriber::set_global_default(collector)?;

    if let Some(path) = &cfg.file {
        tracing::debug!("logging to file \"{}\"", path.display());
    }
    tracing::debug!(
        "logging initiated, RUST_LOG={:?}, default \"{}\"",
        std::env::var("RUST_LOG").ok(),
        cfg.default_directive
    );

    Ok(Guard { _private: () })
}
