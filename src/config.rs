//! Service configuration, resolved once at start-up.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `ip-checkin.toml` in the working directory (optional)
//! 3. Environment variables prefixed `IP_CHECKIN_`, e.g. `IP_CHECKIN_TABLE_NAME`
//!
//! Environment values for string keys are taken verbatim. Everything else is
//! parsed by figment, so `IP_CHECKIN_ALLOW_GET=true` is a bool.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde_derive::{Deserialize, Serialize};

const CONFIG_FILE: &str = "ip-checkin.toml";
const ENV_PREFIX: &str = "IP_CHECKIN_";
const STRING_KEYS: &[&str] = &["host", "table_name", "region", "endpoint_url", "log_level"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// DynamoDB table holding check-ins. Unset means the store is not configured
    /// and every check-in is answered with 500.
    pub table_name: Option<String>,
    pub region: Option<String>,
    /// Override for DynamoDB Local, e.g. `http://localhost:8000`.
    pub endpoint_url: Option<String>,
    /// Create the table at start-up when it does not exist.
    pub create_table: bool,
    /// Upper bound on each individual store call.
    pub store_timeout_ms: u64,
    /// Also route GET to the check-in handler, for callers that still use it.
    pub allow_get: bool,
    pub log_level: String,
    /// Larger request bodies are refused with 413 before the handler runs.
    pub max_body_bytes: usize,
}

/// The subset of [`Config`] needed to reach the table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub table_name: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7071,
            table_name: None,
            region: None,
            endpoint_url: None,
            create_table: false,
            store_timeout_ms: 5_000,
            allow_get: false,
            log_level: "info".into(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract::<Self>()?.validated()
    }

    pub fn figment() -> Figment {
        // `Env` would turn `IP_CHECKIN_TABLE_NAME=12345` into an integer.
        let verbatim: BTreeMap<String, String> = Env::prefixed(ENV_PREFIX)
            .only(STRING_KEYS)
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value))
            .collect();

        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).ignore(STRING_KEYS))
            .merge(Serialized::defaults(verbatim))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn store_settings(&self) -> Option<StoreSettings> {
        let table_name = self.table_name.as_deref().map(str::trim).filter(|t| !t.is_empty())?;

        Some(StoreSettings {
            table_name: table_name.to_string(),
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
        })
    }

    fn validated(self) -> Result<Self, figment::Error> {
        if self.store_timeout_ms == 0 {
            return Err(format!("{ENV_PREFIX}STORE_TIMEOUT_MS must be greater than zero").into());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_leave_store_unconfigured() {
        Jail::expect_with(|_| {
            let config = Config::load()?;
            assert_eq!(config, Config::default());
            assert_eq!(config.store_settings(), None);
            assert!(!config.allow_get);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                    port = 8080
                    table_name = "FromFile"
                    region = "eu-west-1"
                "#,
            )?;
            jail.set_env("IP_CHECKIN_TABLE_NAME", "IpCheckin");
            jail.set_env("IP_CHECKIN_ALLOW_GET", "true");

            let config = Config::load()?;
            assert_eq!(config.port, 8080);
            assert!(config.allow_get);
            assert_eq!(
                config.store_settings(),
                Some(StoreSettings {
                    table_name: "IpCheckin".into(),
                    region: Some("eu-west-1".into()),
                    endpoint_url: None,
                })
            );
            Ok(())
        });
    }

    #[test]
    fn numeric_looking_strings_stay_strings() {
        Jail::expect_with(|jail| {
            jail.set_env("IP_CHECKIN_TABLE_NAME", "12345");
            jail.set_env("IP_CHECKIN_REGION", "007");
            jail.set_env("IP_CHECKIN_PORT", "9000");

            let config = Config::load()?;
            assert_eq!(config.table_name.as_deref(), Some("12345"));
            assert_eq!(config.region.as_deref(), Some("007"));
            assert_eq!(config.port, 9000);
            Ok(())
        });
    }

    #[test]
    fn env_string_beats_file_string() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, r#"host = "10.1.1.1""#)?;
            jail.set_env("IP_CHECKIN_HOST", "0.0.0.0");
            assert_eq!(Config::load()?.host, "0.0.0.0");
            Ok(())
        });
    }

    #[test]
    fn blank_table_name_counts_as_missing() {
        Jail::expect_with(|jail| {
            jail.set_env("IP_CHECKIN_TABLE_NAME", "  ");
            assert_eq!(Config::load()?.store_settings(), None);
            Ok(())
        });
    }

    #[test]
    fn zero_timeout_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("IP_CHECKIN_STORE_TIMEOUT_MS", "0");
            assert!(Config::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn socket_addr_joins_host_and_port() {
        let config = Config {
            host: "0.0.0.0".into(),
            port: 9000,
            ..Config::default()
        };
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:9000");
    }
}
