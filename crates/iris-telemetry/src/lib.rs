//! Tracing setup for the Iris binaries.
//!
//! One formatted layer writes to stderr (stdout belongs to the chat REPL).
//! The level filter sits behind a reload handle so per-module levels can be
//! changed while the process runs.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
    #[error("invalid filter directive: {0}")]
    Filter(String),
}

/// Output encoding for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "iris_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub output: LogOutput,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            output: LogOutput::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Build from the textual level used in settings files. Unknown levels
    /// fall back to `info`.
    pub fn from_level_str(level: &str, output: LogOutput) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            output,
        }
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Render the filter directive for a base level plus module overrides.
pub fn filter_directive(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut out = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        out.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    out
}

/// Keeps the reload handle alive. Dropping it freezes the current levels.
pub struct TelemetryGuard {
    base_level: Level,
    module_levels: Arc<RwLock<Vec<(String, Level)>>>,
    handle: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directive = {
            let mut levels = self.module_levels.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directive(self.base_level, &levels)
        };
        let filter =
            EnvFilter::try_new(&directive).map_err(|e| TelemetryError::Filter(e.to_string()))?;
        self.handle
            .reload(filter)
            .map_err(|e| TelemetryError::Filter(e.to_string()))
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directive = filter_directive(config.log_level, &config.module_levels);
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directive).map_err(|e| TelemetryError::Filter(e.to_string()))?,
    };
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let json_layer = (config.output == LogOutput::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
    });
    let pretty_layer = (config.output == LogOutput::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    Ok(TelemetryGuard {
        base_level: config.log_level,
        module_levels: Arc::new(RwLock::new(config.module_levels)),
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_includes_module_overrides() {
        let levels = vec![
            ("iris_engine".to_string(), Level::DEBUG),
            ("iris_llm".to_string(), Level::TRACE),
        ];
        assert_eq!(
            filter_directive(Level::WARN, &levels),
            "warn,iris_engine=debug,iris_llm=trace"
        );
        assert_eq!(filter_directive(Level::INFO, &[]), "info");
    }

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn from_level_str_falls_back_to_info() {
        let cfg = TelemetryConfig::from_level_str("nonsense", LogOutput::Json);
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.output, LogOutput::Json);
    }

    #[test]
    fn guard_tracks_module_levels() {
        // Only one test in this binary installs the global subscriber.
        let guard = init_telemetry(TelemetryConfig::default()).unwrap();
        guard.set_module_level("iris_store", Level::DEBUG).unwrap();
        guard.set_module_level("iris_store", Level::TRACE).unwrap();
        assert_eq!(
            guard.module_levels(),
            vec![("iris_store".to_string(), Level::TRACE)]
        );
        assert!(matches!(
            init_telemetry(TelemetryConfig::default()),
            Err(TelemetryError::AlreadyInitialized)
        ));
    }
}
