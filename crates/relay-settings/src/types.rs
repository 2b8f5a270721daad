//! Settings sections.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub hub: HubSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.hub.validate()?;
        if self.server.shutdown_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.shutdownTimeoutSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Run mode. `release` silences the per-request access log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Debug,
    Release,
}

/// HTTP listener and asset settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Directory holding the compiled front-end (`index.html`, `assets/`).
    pub static_dir: PathBuf,
    pub mode: RunMode,
    /// Upper bound on draining in-flight requests at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl ServerSettings {
    /// `host:port` string suitable for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: working_dir().join("webserver").join("dist"),
            mode: RunMode::Debug,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Database driver name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Sqlite,
    Mysql,
    Postgres,
}

impl std::str::FromStr for DatabaseKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(SettingsError::InvalidValue(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        })
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub kind: DatabaseKind,
    /// Driver-specific DSN. For SQLite a file path, optionally `file:`-prefixed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
}

impl DatabaseSettings {
    /// Filesystem path of the SQLite database.
    ///
    /// Accepts `file:path?opts` DSNs; defaults to `./data/app.db`.
    pub fn sqlite_path(&self) -> PathBuf {
        let Some(dsn) = self.dsn.as_deref().filter(|d| !d.trim().is_empty()) else {
            return working_dir().join("data").join("app.db");
        };
        let trimmed = dsn.strip_prefix("file:").unwrap_or(dsn);
        let trimmed = trimmed.split('?').next().unwrap_or(trimmed);
        PathBuf::from(trimmed)
    }
}

/// Tunables for the message hub and its connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Per-connection outbound queue; a full queue evicts the connection.
    pub outbound_queue_capacity: usize,
    /// Shared publish buffer; publishers wait when it is full.
    pub publish_buffer: usize,
    /// Buffer for the inbound observer; overflow is dropped.
    pub sink_buffer: usize,
    /// Largest accepted inbound frame.
    pub max_frame_bytes: usize,
    /// Read deadline, refreshed by each pong.
    pub read_timeout_secs: u64,
    /// Interval between server pings.
    pub ping_interval_secs: u64,
    /// Period of the demo tick stream.
    pub demo_tick_millis: u64,
}

impl HubSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn demo_tick(&self) -> Duration {
        Duration::from_millis(self.demo_tick_millis)
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("hub.outboundQueueCapacity", self.outbound_queue_capacity),
            ("hub.publishBuffer", self.publish_buffer),
            ("hub.sinkBuffer", self.sink_buffer),
            ("hub.maxFrameBytes", self.max_frame_bytes),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be at least 1")));
            }
        }
        if self.demo_tick_millis == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.demoTickMillis must be at least 1".into(),
            ));
        }
        if self.ping_interval_secs == 0 || self.ping_interval_secs >= self.read_timeout_secs {
            return Err(SettingsError::InvalidValue(format!(
                "hub.pingIntervalSecs ({}) must be non-zero and shorter than hub.readTimeoutSecs ({})",
                self.ping_interval_secs, self.read_timeout_secs
            )));
        }
        Ok(())
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 16,
            publish_buffer: 32,
            sink_buffer: 32,
            max_frame_bytes: 5120,
            read_timeout_secs: 60,
            ping_interval_secs: 30,
            demo_tick_millis: 1000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`).
    pub level: String,
    /// JSON lines instead of compact text.
    pub json: bool,
    /// Per-module overrides, e.g. `{"tower_http": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

fn working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
