use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::mux::{MuxSettings, HTTP2_PREFACE};

/// Default location of the optional TOML configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

/// Nested sections addressable from `TRACKER_<SECTION>_<FIELD>` variables.
const SECTIONS: &[&str] = &["database", "mux", "docs", "metrics"];

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port shared by the RPC and HTTP surfaces.
    pub port: u16,
    /// Per-request deadline on the RPC stack.
    pub request_timeout_secs: Option<u64>,
    /// PostgreSQL connection settings.
    pub database: DatabaseSettings,
    /// Connection classification settings.
    pub mux: MuxSettings,
    /// Static API documentation.
    pub docs: DocsSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
}

/// PostgreSQL connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection string.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Apply `migrations/` at startup.
    pub run_migrations: bool,
}

/// Locations of the static documentation served over HTTP.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsSettings {
    /// OpenAPI description served at `/swagger.json`.
    pub spec_path: PathBuf,
    /// Directory served under `/swaggerui`.
    pub ui_dir: PathBuf,
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: None,
            database: DatabaseSettings::default(),
            mux: MuxSettings::default(),
            docs: DocsSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            run_migrations: false,
        }
    }
}

impl Default for DocsSettings {
    fn default() -> Self {
        Self {
            spec_path: PathBuf::from("./docs/swagger.json"),
            ui_dir: PathBuf::from("./docs/swaggerui"),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `.env`, the TOML file and the environment.
    ///
    /// Priority, highest first:
    /// 1. `DATABASE_URL` and `PORT`
    /// 2. `TRACKER_`-prefixed variables, split on `_` into sections
    ///    (`TRACKER_DATABASE_MAX_CONNECTIONS=20`)
    /// 3. the TOML file at `TRACKER_CONFIG_PATH` (default `config/server.toml`),
    ///    skipped when missing
    /// 4. built-in defaults
    ///
    /// # Errors
    /// Returns an error if a source is malformed or holds a value of the wrong type.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("TRACKER_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::figment(&config_path).extract()
    }

    /// The layered configuration sources, without `.env` loading.
    pub fn figment(config_path: &str) -> Figment {
        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TRACKER_").map(|key| section_key(key.as_str()).into()))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::raw().only(&["PORT"]))
    }

    /// Converts host and port into a socket address.
    ///
    /// # Errors
    /// Returns an error if the pair is not a valid socket address.
    pub fn addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid listen address: {e}")))
    }

    /// The RPC request deadline, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Validates the configuration before any resource is acquired.
    ///
    /// # Errors
    /// Returns an error message naming the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("database url is empty (set DATABASE_URL)".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("database max_connections cannot be zero".to_string());
        }

        if self.mux.sniff_timeout_ms == 0 {
            return Err("mux sniff_timeout_ms cannot be zero".to_string());
        }

        if self.mux.max_prefix_len < HTTP2_PREFACE.len() {
            return Err(format!(
                "mux max_prefix_len must be at least {}",
                HTTP2_PREFACE.len()
            ));
        }

        if self.request_timeout_secs == Some(0) {
            return Err("request_timeout_secs cannot be zero".to_string());
        }

        Ok(())
    }
}

/// Maps `DATABASE_MAX_CONNECTIONS` to `database.max_connections`.
///
/// Only the first underscore after a known section name separates; field
/// names keep theirs.
fn section_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in SECTIONS {
        if let Some(field) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{field}");
        }
    }
    key
}

impl MetricsSettings {
    /// Converts host and port into a socket address for metrics server.
    ///
    /// # Errors
    /// Returns an error if the pair is not a valid socket address.
    pub fn addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid metrics address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    fn valid() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.database.url = "postgres://localhost/tracker".to_string();
        config
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.docs.spec_path, PathBuf::from("./docs/swagger.json"));
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn empty_database_url_is_rejected() {
        assert!(ServerConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn bad_mux_settings_are_rejected() {
        let mut config = valid();
        config.mux.sniff_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.mux.max_prefix_len = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn section_keys_keep_field_underscores() {
        assert_eq!(section_key("DATABASE_MAX_CONNECTIONS"), "database.max_connections");
        assert_eq!(section_key("MUX_SNIFF_TIMEOUT_MS"), "mux.sniff_timeout_ms");
        assert_eq!(section_key("REQUEST_TIMEOUT_SECS"), "request_timeout_secs");
        assert_eq!(section_key("PORT"), "port");
    }

    #[test]
    fn layered_sources() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "server.toml",
                r#"
                    host = "127.0.0.1"
                    port = 7000

                    [database]
                    max_connections = 4

                    [mux]
                    sniff_timeout_ms = 250
                "#,
            )?;
            jail.set_env("TRACKER_DATABASE_MAX_CONNECTIONS", "20");
            jail.set_env("DATABASE_URL", "postgres://db/tracker");
            jail.set_env("PORT", "9001");

            let config: ServerConfig = ServerConfig::figment("server.toml").extract()?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9001);
            assert_eq!(config.database.max_connections, 20);
            assert_eq!(config.database.url, "postgres://db/tracker");
            assert_eq!(config.mux.sniff_timeout_ms, 250);
            assert_eq!(config.mux.max_prefix_len, 64);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config: ServerConfig = ServerConfig::figment("absent.toml").extract()?;
            assert_eq!(config.mux.max_prefix_len, 64);
            assert_eq!(config.docs.ui_dir, PathBuf::from("./docs/swaggerui"));
            Ok(())
        });
    }
}
