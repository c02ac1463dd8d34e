use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AdRulesError, ConfigError};

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Process-wide configuration shared by the rules service and the engine.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Postgres connection string. When absent the services fall back to
    /// in-memory stores.
    pub database_url: Option<String>,
    pub environment: Environment,
    pub node_name: String,
    pub http_bind: Option<String>,
}

impl CoreConfig {
    /// Loads configuration from the unprefixed process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix("")
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `ADRULES_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let key = |suffix: &str| format!("{}{}", prefix, suffix);

        let database_url = env::var(key("DATABASE_URL"))
            .ok()
            .filter(|value| !value.trim().is_empty());

        let environment = env::var(key("ENV"))
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let node_name = env::var(key("NODE_NAME")).unwrap_or_else(|_| "adrules-node".to_string());
        let http_bind = env::var(key("HTTP_BIND")).ok();

        if let Some(bind) = &http_bind {
            if bind.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key("HTTP_BIND"),
                    value: bind.clone(),
                });
            }
        }

        Ok(Self {
            database_url,
            environment,
            node_name,
            http_bind,
        })
    }

    /// Returns the Postgres URL if one was configured.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    /// Whether the service is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}

/// Reads and parses an optional environment variable.
///
/// Missing variables yield `Ok(None)`; present but unparsable values are a
/// [`ConfigError::InvalidValue`] rather than being silently replaced by a default.
pub fn read_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Reads an optional duration expressed in whole seconds.
pub fn read_env_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(read_env::<u64>(key)?.map(Duration::from_secs))
}

/// Reads an optional duration expressed in milliseconds.
pub fn read_env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(read_env::<u64>(key)?.map(Duration::from_millis))
}

/// Loads the `ADRULES_` prefixed config; a bare `DATABASE_URL` is honoured
/// when the prefixed one is unset.
pub fn load_core_config() -> Result<CoreConfig, AdRulesError> {
    let mut config = CoreConfig::from_env_with_prefix("ADRULES_")?;
    if config.database_url.is_none() {
        config.database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_default_environment() {
        std::env::remove_var("CFGTEST_A_ENV");
        std::env::set_var("CFGTEST_A_DATABASE_URL", "postgres://example");
        let cfg = CoreConfig::from_env_with_prefix("CFGTEST_A_").expect("config should load");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.database_url(), Some("postgres://example"));
        assert_eq!(cfg.node_name, "adrules-node");
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        std::env::set_var("CFGTEST_B_DATABASE_URL", "   ");
        std::env::set_var("CFGTEST_B_ENV", "prod");
        let cfg = CoreConfig::from_env_with_prefix("CFGTEST_B_").expect("config should load");
        assert!(cfg.database_url().is_none());
        assert!(cfg.is_production());
    }

    #[test]
    fn read_env_rejects_garbage() {
        std::env::set_var("CFGTEST_WORKERS", "many");
        let err = read_env::<usize>("CFGTEST_WORKERS").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        std::env::set_var("CFGTEST_TIMEOUT", "15");
        assert_eq!(
            read_env_secs("CFGTEST_TIMEOUT").unwrap(),
            Some(Duration::from_secs(15))
        );
        assert_eq!(read_env::<u32>("CFGTEST_NOT_SET_ANYWHERE").unwrap(), None);
    }
}
