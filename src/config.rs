//! Connection descriptors and library settings.
//!
//! The core treats configuration as data: a [`DatabaseConfig`] per named
//! database plus a handful of tuning knobs on [`JrmConfig`]. Descriptors
//! follow the JSON wire format (`type`, `host`, `port`, `user`, `password`,
//! `database`, optional `dsn`, free-form `options`), with `${ENV_VAR}`
//! expansion inside string values.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::dsn::dsn_to_parts;
use crate::error::JrmError;
use crate::types::BackendType;

/// A single database connection descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDatabaseConfig", into = "RawDatabaseConfig")]
pub struct DatabaseConfig {
    pub backend: BackendType,
    pub dsn: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawDatabaseConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dsn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
}

impl TryFrom<RawDatabaseConfig> for DatabaseConfig {
    type Error = JrmError;

    fn try_from(raw: RawDatabaseConfig) -> Result<Self, Self::Error> {
        let expand = |v: Option<String>| v.map(|s| expand_env(&s));
        let dsn = expand(raw.dsn);

        // DSN-first: the URL fills in whatever parts were not given.
        let mut cfg = DatabaseConfig {
            backend: BackendType::Generic,
            dsn: dsn.clone(),
            host: expand(raw.host),
            port: raw.port,
            user: expand(raw.user),
            password: expand(raw.password),
            database: expand(raw.database),
            options: raw
                .options
                .into_iter()
                .map(|(k, v)| (k, expand_env(&v)))
                .collect(),
        };

        if let Some(dsn) = &dsn {
            let parts = dsn_to_parts(dsn)?;
            cfg.backend = parts.backend;
            cfg.host = cfg.host.or(parts.host);
            cfg.port = cfg.port.or(parts.port);
            cfg.user = cfg.user.or(parts.user);
            cfg.password = cfg.password.or(parts.password);
            cfg.database = cfg.database.or(parts.database);
            for (key, value) in parts.options {
                cfg.options.entry(key).or_insert(value);
            }
        }

        // An explicit type wins over the DSN scheme.
        if let Some(token) = raw.backend {
            cfg.backend = BackendType::from_token(&expand_env(&token));
        } else if cfg.dsn.is_none() {
            return Err(JrmError::ConfigError(
                "either 'dsn' or 'type' is required for a database entry".to_string(),
            ));
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

impl From<DatabaseConfig> for RawDatabaseConfig {
    fn from(cfg: DatabaseConfig) -> Self {
        RawDatabaseConfig {
            backend: Some(cfg.backend.as_str().to_string()),
            dsn: cfg.dsn,
            host: cfg.host,
            port: cfg.port,
            user: cfg.user,
            password: cfg.password,
            database: cfg.database,
            options: cfg.options,
        }
    }
}

impl DatabaseConfig {
    /// Check the descriptor invariant: a DSN, or enough parts to connect
    /// (host + database for network backends; a database path for SQLite).
    ///
    /// # Errors
    ///
    /// `ConfigError` describing the missing field.
    pub fn validate(&self) -> Result<(), JrmError> {
        if self.dsn.is_some() {
            return Ok(());
        }
        match self.backend {
            BackendType::Sqlite => {
                if self.database.is_none() {
                    return Err(JrmError::ConfigError(
                        "sqlite descriptor needs a database path or dsn".to_string(),
                    ));
                }
            }
            BackendType::Spark | BackendType::Generic => {}
            _ => {
                if self.host.is_none() || self.database.is_none() {
                    return Err(JrmError::ConfigError(format!(
                        "{} descriptor needs host and database, or a dsn",
                        self.backend
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse one descriptor from a JSON value.
    ///
    /// # Errors
    ///
    /// `ConfigError` on shape or invariant violations.
    pub fn from_json(value: &JsonValue) -> Result<Self, JrmError> {
        let raw: RawDatabaseConfig = serde_json::from_value(value.clone())
            .map_err(|e| JrmError::ConfigError(format!("invalid database descriptor: {e}")))?;
        raw.try_into()
    }

    /// Option lookup with a default, for connector knobs like `sslmode`.
    #[must_use]
    pub fn option<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.options.get(key).map_or(default, String::as_str)
    }
}

/// Expand `${VAR}` references from the process environment; missing
/// variables expand to the empty string.
#[must_use]
pub fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Ok(val) = std::env::var(name) {
                    out.push_str(&val);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Library-wide settings plus the named database descriptors.
#[derive(Debug, Clone)]
pub struct JrmConfig {
    databases: HashMap<String, DatabaseConfig>,
    pub default_db: Option<String>,
    pub connect_timeout: Duration,
    /// Cap on rows fetched by `query` and used as the default SELECT limit.
    pub data_fetch_limit: u64,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub max_cached_conn: u32,
    /// How long a pool checkout may block before `PoolExhausted`.
    pub pool_timeout: Duration,
}

impl Default for JrmConfig {
    fn default() -> Self {
        Self {
            databases: HashMap::new(),
            default_db: None,
            connect_timeout: Duration::from_secs(40),
            data_fetch_limit: 1000,
            min_pool_size: 1,
            max_pool_size: 10,
            max_cached_conn: 5,
            pool_timeout: Duration::from_secs(30),
        }
    }
}

impl JrmConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database descriptor under a name.
    #[must_use]
    pub fn with_database(mut self, name: impl Into<String>, cfg: DatabaseConfig) -> Self {
        let name = name.into();
        if self.default_db.is_none() {
            self.default_db = Some(name.clone());
        }
        self.databases.insert(name, cfg);
        self
    }

    #[must_use]
    pub fn with_default_db(mut self, name: impl Into<String>) -> Self {
        self.default_db = Some(name.into());
        self
    }

    /// Resolve a descriptor by name, falling back to the default.
    ///
    /// # Errors
    ///
    /// `ConfigError` when the key (or any database at all) is unknown.
    pub fn require(&self, name: Option<&str>) -> Result<&DatabaseConfig, JrmError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.default_db.clone())
            .or_else(|| self.databases.keys().next().cloned())
            .ok_or_else(|| JrmError::ConfigError("no databases configured".to_string()))?;
        self.databases
            .get(&key)
            .ok_or_else(|| JrmError::ConfigError(format!("unknown database key: {key:?}")))
    }

    pub fn databases(&self) -> impl Iterator<Item = (&str, &DatabaseConfig)> {
        self.databases.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Load from a JSON document of the shape
    /// `{"databases": {name: descriptor, ...}, "default_db": ..., tuning...}`.
    ///
    /// # Errors
    ///
    /// `ConfigError` on invalid JSON or descriptors.
    pub fn from_json_str(text: &str) -> Result<Self, JrmError> {
        let doc: JsonValue = serde_json::from_str(text)
            .map_err(|e| JrmError::ConfigError(format!("invalid config JSON: {e}")))?;

        let mut config = JrmConfig::new();
        let Some(entries) = doc.get("databases").and_then(JsonValue::as_object) else {
            return Err(JrmError::ConfigError(
                "config JSON must contain a 'databases' object".to_string(),
            ));
        };
        for (name, descriptor) in entries {
            let cfg = DatabaseConfig::from_json(descriptor)?;
            config.databases.insert(name.clone(), cfg);
        }

        config.default_db = doc
            .get("default_db")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .or_else(|| config.databases.keys().next().cloned());

        let secs = |key: &str, default: u64| -> u64 {
            doc.get(key).and_then(JsonValue::as_u64).unwrap_or(default)
        };
        config.connect_timeout = Duration::from_secs(secs("connect_timeout", 40));
        config.data_fetch_limit = secs("data_fetch_limit", 1000);
        config.min_pool_size = secs("min_conn_pool_size", 1) as u32;
        config.max_pool_size = secs("max_conn_pool_size", 10) as u32;
        config.max_cached_conn = secs("max_cached_conn", 5) as u32;
        config.pool_timeout = Duration::from_secs(secs("pool_timeout", 30));
        Ok(config)
    }

    /// Load from environment variables.
    ///
    /// `{P}DATABASES_JSON` provides an inline JSON object of descriptors;
    /// alternatively `{P}DB_KEY` with `{P}DB_DSN` or the flat
    /// `{P}DB_TYPE`/`HOST`/`PORT`/`USER`/`PASSWORD`/`NAME` variables defines
    /// a single database. Tuning: `{P}CONNECT_TIMEOUT`,
    /// `{P}DATA_FETCH_LIMIT`, `{P}MIN_CONN_POOL_SIZE`,
    /// `{P}MAX_CONN_POOL_SIZE`, `{P}MAX_CACHED_CONN`, `{P}POOL_TIMEOUT`.
    ///
    /// # Errors
    ///
    /// `ConfigError` when nothing is configured or a descriptor is invalid.
    pub fn from_env(prefix: &str) -> Result<Self, JrmError> {
        let get = |name: &str| std::env::var(format!("{prefix}{name}")).ok();

        let mut config = JrmConfig::new();

        if let Some(inline) = get("DATABASES_JSON") {
            let doc: JsonValue = serde_json::from_str(&inline).map_err(|e| {
                JrmError::ConfigError(format!("{prefix}DATABASES_JSON is not valid JSON: {e}"))
            })?;
            let Some(entries) = doc.as_object() else {
                return Err(JrmError::ConfigError(format!(
                    "{prefix}DATABASES_JSON must be a JSON object"
                )));
            };
            for (name, descriptor) in entries {
                config
                    .databases
                    .insert(name.clone(), DatabaseConfig::from_json(descriptor)?);
            }
        }

        if let Some(key) = get("DB_KEY") {
            let cfg = if let Some(dsn) = get("DB_DSN") {
                DatabaseConfig::from_json(&serde_json::json!({ "dsn": dsn }))?
            } else {
                let options: BTreeMap<String, String> = match get("DB_OPTIONS") {
                    Some(text) => serde_json::from_str(&text).map_err(|e| {
                        JrmError::ConfigError(format!("{prefix}DB_OPTIONS is not valid JSON: {e}"))
                    })?,
                    None => BTreeMap::new(),
                };
                let mut descriptor = serde_json::json!({
                    "type": get("DB_TYPE").unwrap_or_default(),
                    "options": options,
                });
                for (field, var) in [
                    ("host", "DB_HOST"),
                    ("user", "DB_USER"),
                    ("password", "DB_PASSWORD"),
                    ("database", "DB_NAME"),
                ] {
                    if let Some(value) = get(var) {
                        descriptor[field] = JsonValue::String(value);
                    }
                }
                if let Some(port) = get("DB_PORT") {
                    let port: u16 = port.parse().map_err(|_| {
                        JrmError::ConfigError(format!("invalid {prefix}DB_PORT: {port}"))
                    })?;
                    descriptor["port"] = JsonValue::from(port);
                }
                DatabaseConfig::from_json(&descriptor)?
            };
            config.databases.insert(key.clone(), cfg);
            config.default_db = Some(key);
        }

        if config.databases.is_empty() {
            return Err(JrmError::ConfigError(format!(
                "no database configuration found under prefix {prefix}"
            )));
        }

        if let Some(name) = get("DB_DEFAULT") {
            config.default_db = Some(name);
        } else if config.default_db.is_none() {
            config.default_db = config.databases.keys().next().cloned();
        }

        let parse = |name: &str, default: u64| -> u64 {
            get(name).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        config.connect_timeout = Duration::from_secs(parse("CONNECT_TIMEOUT", 40));
        config.data_fetch_limit = parse("DATA_FETCH_LIMIT", 1000);
        config.min_pool_size = parse("MIN_CONN_POOL_SIZE", 1) as u32;
        config.max_pool_size = parse("MAX_CONN_POOL_SIZE", 10) as u32;
        config.max_cached_conn = parse("MAX_CACHED_CONN", 5) as u32;
        config.pool_timeout = Duration::from_secs(parse("POOL_TIMEOUT", 30));
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_from_wire_format() {
        let cfg = DatabaseConfig::from_json(&json!({
            "type": "postgresql",
            "host": "localhost",
            "port": 5432,
            "user": "app",
            "password": "secret",
            "database": "appdb",
            "options": {"sslmode": "require"}
        }))
        .unwrap();
        assert_eq!(cfg.backend, BackendType::Postgres);
        assert_eq!(cfg.option("sslmode", "prefer"), "require");
    }

    #[test]
    fn dsn_fills_missing_parts() {
        let cfg = DatabaseConfig::from_json(&json!({
            "dsn": "mysql://u:p@db.internal:3306/sales?charset=utf8"
        }))
        .unwrap();
        assert_eq!(cfg.backend, BackendType::Mysql);
        assert_eq!(cfg.host.as_deref(), Some("db.internal"));
        assert_eq!(cfg.database.as_deref(), Some("sales"));
        assert_eq!(cfg.options.get("charset").map(String::as_str), Some("utf8"));
    }

    #[test]
    fn missing_type_and_dsn_is_rejected() {
        let err = DatabaseConfig::from_json(&json!({"host": "h", "database": "d"})).unwrap_err();
        assert!(matches!(err, JrmError::ConfigError(_)));
    }

    #[test]
    fn incomplete_parts_are_rejected() {
        let err =
            DatabaseConfig::from_json(&json!({"type": "postgres", "host": "h"})).unwrap_err();
        assert!(matches!(err, JrmError::ConfigError(_)));
    }

    #[test]
    fn env_expansion() {
        assert_eq!(expand_env("${JRM_TEST_MISSING_XYZ}"), "");
        assert_eq!(expand_env("no refs"), "no refs");
        assert_eq!(expand_env("${unterminated"), "${unterminated");
        if let Some((name, value)) = std::env::vars().find(|(_, v)| !v.is_empty()) {
            assert_eq!(expand_env(&format!("${{{name}}}")), value);
        }
    }

    #[test]
    fn config_document_parses() {
        let config = JrmConfig::from_json_str(
            r#"{
                "databases": {
                    "main": {"type": "sqlite", "database": ":memory:"}
                },
                "default_db": "main",
                "data_fetch_limit": 500
            }"#,
        )
        .unwrap();
        assert_eq!(config.data_fetch_limit, 500);
        assert_eq!(config.require(None).unwrap().backend, BackendType::Sqlite);
        assert!(config.require(Some("missing")).is_err());
    }
}
