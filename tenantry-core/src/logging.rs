//! Logging setup.
//!
//! Every crate in the workspace logs through `tracing` with structured fields.
//! This module installs a `tracing-subscriber` registry (with the
//! `tracing-subscriber` feature) configured from the environment.
//!
//! # Environment Variables
//!
//! - `TENANTRY_DEBUG=true|1|yes` - enable debug logging
//! - `TENANTRY_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `TENANTRY_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! ```rust,no_run
//! tenantry_core::logging::init();
//! ```

use std::sync::Once;

use crate::config::{EnvSource, StdEnvSource};

static INIT: Once = Once::new();

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    Compact,
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level applied to the tenantry crates; `None` leaves logging uninstalled.
    pub level: Option<&'static str>,
    /// Output format.
    pub format: LogFormat,
}

impl LogSettings {
    /// Resolve settings from an environment source.
    pub fn from_source(env: &dyn EnvSource) -> Self {
        let debug = env
            .get("TENANTRY_DEBUG")
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"));

        let explicit = env.get("TENANTRY_LOG_LEVEL").and_then(|level| {
            match level.to_lowercase().as_str() {
                "trace" => Some("trace"),
                "debug" => Some("debug"),
                "info" => Some("info"),
                "warn" => Some("warn"),
                "error" => Some("error"),
                _ => None,
            }
        });

        let level = match (explicit, debug) {
            (Some(level), _) => Some(level),
            (None, true) => Some("debug"),
            (None, false) if env.get("TENANTRY_LOG_LEVEL").is_some() => Some("warn"),
            (None, false) => None,
        };

        let format = match env
            .get("TENANTRY_LOG_FORMAT")
            .map(|f| f.to_lowercase())
            .as_deref()
        {
            Some("pretty") => LogFormat::Pretty,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Json,
        };

        Self { level, format }
    }

    /// `EnvFilter` directive covering the workspace crates.
    pub fn directive(&self) -> Option<String> {
        self.level.map(|level| {
            format!(
                "tenantry={level},tenantry_core={level},tenantry_mongodb={level},tenantry_axum={level}"
            )
        })
    }
}

/// Check if debug-level logging is configured.
pub fn is_debug_enabled() -> bool {
    LogSettings::from_source(&StdEnvSource).level == Some("debug")
}

/// Install the global subscriber once. Later calls are no-ops.
///
/// Nothing is installed unless `TENANTRY_DEBUG` or `TENANTRY_LOG_LEVEL` is set,
/// leaving room for an application-provided subscriber.
pub fn init() {
    init_from(&StdEnvSource);
}

/// Like [`init`], reading settings from `env`.
pub fn init_from(env: &dyn EnvSource) {
    let settings = LogSettings::from_source(env);
    INIT.call_once(|| install(&settings));
}

#[cfg(feature = "tracing-subscriber")]
fn install(settings: &LogSettings) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let Some(directive) = settings.directive() else {
        return;
    };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!(
            level = settings.level,
            format = ?settings.format,
            "tenantry logging initialized"
        );
    }
}

#[cfg(not(feature = "tracing-subscriber"))]
fn install(_settings: &LogSettings) {}
