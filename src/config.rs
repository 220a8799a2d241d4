//! Service configuration, read from a TOML file (or JSON for `*.json` paths).
//!
//! The file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
//!
//! Store settings live in a `[database]` table. The flat layout of older
//! `cfg.json` files (`driver`, `connection_string`, `db_host`, `db_port`,
//! `db_user`, `db_password`, `db_name` at the top level) is also accepted;
//! flat keys take precedence over the table.
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid JSON in config file: {0}")]
    ParseJson(#[from] serde_json::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but cannot be used.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes between update cycles.
    pub update_minutes: u64,

    /// Hours between cleanup cycles.
    pub cleanup_interval_hours: u64,

    /// Per-feed article ceiling. Cleanup prunes every feed holding more
    /// articles than this; with 0, any feed that has articles is pruned.
    pub articles_max_count: usize,

    /// Capacity of each pipeline hand-off queue.
    pub queue_capacity: usize,

    /// Upper bound on simultaneous feed fetches.
    pub max_concurrent_fetches: usize,

    /// Whole-request timeout for a feed fetch, in seconds.
    pub request_timeout_secs: u64,

    /// Connection (TCP + TLS) timeout for a feed fetch, in seconds.
    pub connect_timeout_secs: u64,

    /// Allow feed URLs that point at loopback or private networks.
    ///
    /// Off by default: feeds hosted on `localhost`, `10.x`, `192.168.x` and
    /// similar addresses are refused until this is set to `true`. Enable it
    /// for self-hosted or LAN feeds.
    pub allow_private_hosts: bool,

    pub database: DatabaseConfig,

    #[serde(flatten)]
    legacy_database: LegacyDatabaseKeys,
}

/// Which [`FeedStore`](crate::storage::FeedStore) backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDriver {
    Sqlite,
    Postgres,
}

/// Store connection settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite3` / `sqlite` or `postgres` / `postgresql`.
    pub driver: String,

    /// SQLite file path or `:memory:`. With PostgreSQL, a `postgres://` URL
    /// here replaces the individual connection keys below.
    pub connection_string: String,

    #[serde(alias = "db_host")]
    pub host: String,

    #[serde(alias = "db_port")]
    pub port: u16,

    #[serde(alias = "db_user")]
    pub user: String,

    #[serde(alias = "db_password", deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    #[serde(alias = "db_name")]
    pub name: String,
}

/// Store keys as they appear at the top level of a legacy `cfg.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyDatabaseKeys {
    driver: Option<String>,
    connection_string: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_user: Option<String>,
    #[serde(deserialize_with = "deserialize_secret")]
    db_password: Option<SecretString>,
    db_name: Option<String>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_minutes: 30,
            cleanup_interval_hours: 168,
            articles_max_count: 1000,
            queue_capacity: 200,
            max_concurrent_fetches: 32,
            request_timeout_secs: 120,
            connect_timeout_secs: 5,
            allow_private_hosts: false,
            database: DatabaseConfig::default(),
            legacy_database: LegacyDatabaseKeys::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite3".to_string(),
            connection_string: "rss.db".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            name: "newshub".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn driver(&self) -> Result<DatabaseDriver, ConfigError> {
        match self.driver.as_str() {
            "sqlite3" | "sqlite" => Ok(DatabaseDriver::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseDriver::Postgres),
            other => Err(ConfigError::Invalid(format!(
                "unsupported database driver '{}' (expected sqlite3 or postgres)",
                other
            ))),
        }
    }

    /// PostgreSQL connection options, from a `postgres://` connection string
    /// when one is set, else from host/port/user/password/name.
    pub fn postgres_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let url = self.connection_string.as_str();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return PgConnectOptions::from_str(url)
                .map_err(|e| ConfigError::Invalid(format!("bad PostgreSQL URL: {}", e)));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid("db_port must be greater than 0".into()));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name)
            .ssl_mode(PgSslMode::Prefer);
        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }
        Ok(options)
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Interval ceilings (one year) keep timer deadlines representable.
    const MAX_UPDATE_MINUTES: u64 = 365 * 24 * 60;
    const MAX_CLEANUP_HOURS: u64 = 365 * 24;

    const KNOWN_KEYS: [&'static str; 16] = [
        "update_minutes",
        "cleanup_interval_hours",
        "articles_max_count",
        "queue_capacity",
        "max_concurrent_fetches",
        "request_timeout_secs",
        "connect_timeout_secs",
        "allow_private_hosts",
        "database",
        "driver",
        "connection_string",
        "db_host",
        "db_port",
        "db_user",
        "db_password",
        "db_name",
    ];

    /// Load configuration from a TOML (or `.json`) file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid syntax → `Err(ConfigError::Parse)` / `Err(ConfigError::ParseJson)`
    /// - Zero or oversized intervals, zero capacities or timeouts, or an
    ///   unknown driver → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut config: Config = if is_json {
            if let Ok(serde_json::Value::Object(raw)) = serde_json::from_str(&content) {
                Self::warn_unknown_keys(raw.keys().map(String::as_str));
            }
            serde_json::from_str(&content)?
        } else {
            if let Ok(raw) = content.parse::<toml::Table>() {
                Self::warn_unknown_keys(raw.keys().map(String::as_str));
            }
            toml::from_str(&content)?
        };
        config.apply_legacy_database_keys();

        config.validate()?;
        tracing::info!(
            path = %path.display(),
            update_minutes = config.update_minutes,
            articles_max_count = config.articles_max_count,
            driver = %config.database.driver,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn warn_unknown_keys<'a>(keys: impl Iterator<Item = &'a str>) {
        for key in keys {
            if !Self::KNOWN_KEYS.contains(&key) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }
    }

    /// Move top-level store keys into `database`.
    fn apply_legacy_database_keys(&mut self) {
        let legacy = std::mem::take(&mut self.legacy_database);
        let db = &mut self.database;

        if let Some(driver) = legacy.driver {
            db.driver = driver;
        }
        if let Some(connection_string) = legacy.connection_string {
            db.connection_string = connection_string;
        }
        if let Some(host) = legacy.db_host {
            db.host = host;
        }
        if let Some(port) = legacy.db_port {
            db.port = port;
        }
        if let Some(user) = legacy.db_user {
            db.user = user;
        }
        if legacy.db_password.is_some() {
            db.password = legacy.db_password;
        }
        if let Some(name) = legacy.db_name {
            db.name = name;
        }
    }

    /// Reject values the scheduler, pipeline or store cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("update_minutes", self.update_minutes),
            ("cleanup_interval_hours", self.cleanup_interval_hours),
            ("queue_capacity", self.queue_capacity as u64),
            ("max_concurrent_fetches", self.max_concurrent_fetches as u64),
            ("request_timeout_secs", self.request_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", key)));
            }
        }

        let bounded = [
            ("update_minutes", self.update_minutes, Self::MAX_UPDATE_MINUTES),
            (
                "cleanup_interval_hours",
                self.cleanup_interval_hours,
                Self::MAX_CLEANUP_HOURS,
            ),
        ];
        for (key, value, max) in bounded {
            if value > max {
                return Err(ConfigError::Invalid(format!(
                    "{} must be at most {} (one year)",
                    key, max
                )));
            }
        }

        if self.database.driver()? == DatabaseDriver::Postgres {
            self.database.postgres_options()?;
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_minutes.saturating_mul(60))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.saturating_mul(60 * 60))
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            allow_private_hosts: self.allow_private_hosts,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
