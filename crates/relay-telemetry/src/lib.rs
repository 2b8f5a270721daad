//! Process-wide `tracing` subscriber setup.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relay_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
    /// Colourise compact output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            ansi: true,
        }
    }
}

/// A configured level name that did not parse and was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidLevel {
    /// Module the level was meant for; `None` for the default level.
    pub target: Option<String>,
    pub value: String,
}

impl TelemetryConfig {
    /// Build from level names, falling back to INFO for a bad default level
    /// and dropping bad per-module levels. What was skipped is returned so it
    /// can be logged once the subscriber is up.
    pub fn from_level_names<I, K, V>(level: &str, modules: I, json: bool) -> (Self, Vec<InvalidLevel>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut invalid = Vec::new();
        let log_level = parse_level(level).unwrap_or_else(|| {
            invalid.push(InvalidLevel {
                target: None,
                value: level.to_owned(),
            });
            Level::INFO
        });

        let mut module_levels = Vec::new();
        for (module, raw) in modules {
            let module = module.into();
            match parse_level(raw.as_ref()) {
                Some(level) => module_levels.push((module, level)),
                None => invalid.push(InvalidLevel {
                    target: Some(module),
                    value: raw.as_ref().to_owned(),
                }),
            }
        }

        let config = Self {
            log_level,
            module_levels,
            json,
            ansi: !json,
        };
        (config, invalid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Render the filter directive string for `config`, e.g. `info,relay_server=debug`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Parse a level name such as `"warn"` or `"DEBUG"`.
pub fn parse_level(raw: &str) -> Option<Level> {
    raw.trim().parse().ok()
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(config.ansi)
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(filter_directives(&TelemetryConfig::default()), "info");
    }

    #[test]
    fn module_overrides_are_appended() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("relay_server".into(), Level::DEBUG),
                ("tower_http".into(), Level::TRACE),
            ],
            ..TelemetryConfig::default()
        };
        assert_eq!(
            filter_directives(&config),
            "warn,relay_server=debug,tower_http=trace"
        );
    }

    #[test]
    fn parse_level_is_case_insensitive() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn bad_level_names_are_reported() {
        let modules = [("relay_server", "debug"), ("tower_http", "chatty")];
        let (config, invalid) = TelemetryConfig::from_level_names("loud", modules, true);

        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.module_levels, vec![("relay_server".to_string(), Level::DEBUG)]);
        assert!(config.json && !config.ansi);
        assert_eq!(
            invalid,
            vec![
                InvalidLevel { target: None, value: "loud".into() },
                InvalidLevel { target: Some("tower_http".into()), value: "chatty".into() },
            ]
        );
    }

    #[test]
    fn valid_level_names_report_nothing() {
        let (config, invalid) =
            TelemetryConfig::from_level_names("warn", Vec::<(String, String)>::new(), false);
        assert_eq!(config.log_level, Level::WARN);
        assert!(config.ansi);
        assert!(invalid.is_empty());
    }

    #[test]
    fn second_init_reports_error() {
        let config = TelemetryConfig {
            ansi: false,
            ..TelemetryConfig::default()
        };
        let _ = init_telemetry(&config);
        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::AlreadyInitialized)
        ));
    }
}
