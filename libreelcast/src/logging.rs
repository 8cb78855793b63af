//! Logging setup for reel-post
//!
//! Everything goes to stderr; stdout carries only the run summary. The
//! level applies to Reelcast's own crates, while the HTTP stack stays at
//! `warn` so request internals do not drown the publish log. `RUST_LOG`
//! overrides both.
//!
//! ```no_run
//! use libreelcast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Crates whose events follow the configured level
const OWN_TARGETS: &[&str] = &["libreelcast", "reel_post"];

/// Level for everything else (reqwest, hyper, rustls)
const DEPENDENCY_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines, no colors
    Text,
    /// One JSON object per line, span fields flattened in
    Json,
    /// Multi-line with source locations
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` raises Reelcast's own events to debug
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Filter directive used when `RUST_LOG` is not set,
    /// e.g. `warn,libreelcast=info,reel_post=info`
    pub fn directive(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.trim() };
        let mut directive = DEPENDENCY_LEVEL.to_string();
        for target in OWN_TARGETS {
            directive.push_str(&format!(",{}={}", target, level));
        }
        directive
    }

    /// Install the global subscriber. Later calls leave the first one in place.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .try_init(),
            LogFormat::Pretty => builder.pretty().with_file(true).with_line_number(true).try_init(),
            LogFormat::Text => builder.with_target(false).with_ansi(false).try_init(),
        };
        if installed.is_err() {
            tracing::debug!("Global subscriber already installed");
        }
    }
}
