//! Structured logging setup.
//!
//! Everything in the crate logs through `tracing`. Binaries (and embedders
//! that do not already install a subscriber) call [`init_logging`] once at
//! startup.
//!
//! ## Environment Variables
//!
//! - `AADGATE_LOG_LEVEL`: trace/debug/info/warn/error (default: info)
//! - `AADGATE_LOG_FORMAT`: json/pretty (default: json)
//! - `AADGATE_LOG_TARGET_FILTER`: extra comma-separated filter directives
//! - `AADGATE_LOG_INCLUDE_LOCATION`: include file:line (default: false)
//! - `AADGATE_LOG_ASYNC`: buffer through a background writer (default: true)
//!
//! `RUST_LOG`, when set, takes precedence over `AADGATE_LOG_LEVEL`.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    pub format: LogFormat,
    pub target_filter: Option<String>,
    pub include_location: bool,
    pub async_logging: bool,
}

impl LogConfig {
    /// Read configuration from `AADGATE_LOG_*`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str, default: bool| {
            lookup(name)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        Self {
            log_level: lookup("AADGATE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format: LogFormat::parse(&lookup("AADGATE_LOG_FORMAT").unwrap_or_default()),
            target_filter: lookup("AADGATE_LOG_TARGET_FILTER").filter(|s| !s.trim().is_empty()),
            include_location: flag("AADGATE_LOG_INCLUDE_LOCATION", false),
            async_logging: flag("AADGATE_LOG_ASYNC", true),
        }
    }

    /// Pretty, synchronous, debug-level output for local use.
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            target_filter: None,
            include_location: true,
            async_logging: false,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.to_lowercase()));
        // Quiet HTTP client internals.
        for quiet in ["hyper_util=warn", "reqwest=warn", "rustls=warn"] {
            if let Ok(directive) = quiet.parse() {
                filter = filter.add_directive(directive);
            }
        }
        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => eprintln!("Warning: invalid log filter directive: {}", directive),
                }
            }
        }
        filter
    }
}

/// Initialise logging from the environment.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    init_logging_with_config(&LogConfig::from_env())
}

/// Install the global subscriber. Logs go to stderr so stdout stays free
/// for command output.
///
/// With async logging the returned guard must be held until exit; dropping
/// it flushes and stops the background writer.
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = if config.async_logging {
        let (nb, guard) = tracing_appender::non_blocking(std::io::stderr());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(nb), Some(guard))
    } else {
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr), None)
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("failed to initialise logging")?;
    Ok(guard)
}

/// Hex SHA-256 of a token. Used as a cache key so raw tokens are never
/// held as keys.
pub fn token_digest(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Short, non-reversible identifier for a token in logs: the first 12 hex
/// digits of its SHA-256.
pub fn token_fingerprint(token: &str) -> String {
    let mut digest = token_digest(token);
    digest.truncate(12);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_lookup() {
        let config = LogConfig::from_lookup(|name| match name {
            "AADGATE_LOG_LEVEL" => Some("debug".to_string()),
            "AADGATE_LOG_FORMAT" => Some("PRETTY".to_string()),
            "AADGATE_LOG_ASYNC" => Some("false".to_string()),
            _ => None,
        });
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.async_logging);
        assert!(!config.include_location);
        assert_eq!(config.target_filter, None);
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::from_lookup(|_| None);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.async_logging);
    }

    #[test]
    fn test_token_fingerprint() {
        let fp = token_fingerprint("header.claims.signature");
        assert_eq!(fp.len(), 12);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, token_fingerprint("header.claims.signature"));
        assert_ne!(fp, token_fingerprint("header.claims.signaturf"));
        // SHA-256("abc") = ba7816bf8f01...
        assert_eq!(token_fingerprint("abc"), "ba7816bf8f01");
        assert_eq!(token_digest("abc").len(), 64);
        assert!(token_digest("abc").starts_with(&token_fingerprint("abc")));
    }
}
