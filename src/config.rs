use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEVELOPMENT: &str = "development";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node_env: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
    pub database_url: Option<String>,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    #[serde(default = "default_json_limit")]
    pub json_limit: usize,
    #[serde(default = "default_max_file_upload")]
    pub max_file_upload: usize,
    #[serde(default = "default_max_field_size")]
    pub max_field_size: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_json_limit() -> usize {
    100 * 1024
}

fn default_max_file_upload() -> usize {
    1_000_000
}

fn default_max_field_size() -> usize {
    1024 * 1024
}

fn default_rate_limit_window_secs() -> u64 {
    10 * 60
}

fn default_rate_limit_max() -> u32 {
    25
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_env: None,
            host: default_host(),
            port: default_port(),
            workers: None,
            database_url: None,
            public_dir: default_public_dir(),
            json_limit: default_json_limit(),
            max_file_upload: default_max_file_upload(),
            max_field_size: default_max_field_size(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max: default_rate_limit_max(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Self::from_settings(cfg)
    }

    /// Deserializes and validates an already assembled `config::Config`.
    pub fn from_settings(cfg: config::Config) -> Result<Self, config::ConfigError> {
        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.node_env.as_deref() == Some(DEVELOPMENT)
    }

    /// Name of the running mode for the startup banner.
    pub fn mode(&self) -> &str {
        self.node_env.as_deref().unwrap_or("undefined")
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.host.is_empty()
            || !self
                .host
                .chars()
                .all(|c| c.is_alphanumeric() || ".:-_".contains(c))
        {
            return Err(config::ConfigError::Message(
                "Invalid host format".to_string(),
            ));
        }

        // 0 asks the OS for an ephemeral port.
        if self.port != 0 && self.port < 1024 {
            return Err(config::ConfigError::Message(
                "Port must be 1024 or higher for security reasons".to_string(),
            ));
        }

        if self.workers == Some(0) {
            return Err(config::ConfigError::Message(
                "workers must be at least 1".to_string(),
            ));
        }

        if self.rate_limit_max == 0 || self.rate_limit_window_secs == 0 {
            return Err(config::ConfigError::Message(
                "rate_limit_max and rate_limit_window_secs must be non-zero".to_string(),
            ));
        }

        let min = 1024;
        let max = 50 * 1024 * 1024;
        if self.json_limit < min || self.json_limit > max {
            return Err(config::ConfigError::Message(format!(
                "json_limit must be between {} and {} bytes",
                min, max
            )));
        }

        if self.max_file_upload == 0 || self.max_field_size == 0 {
            return Err(config::ConfigError::Message(
                "max_file_upload and max_field_size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub sql_log: Option<bool>,
}

impl DatabaseSettings {
    pub fn default_from_url(url: String) -> Self {
        Self {
            url,
            max_connections: parse_env_var("DATABASE_MAX_CONNECTIONS"),
            min_connections: parse_env_var("DATABASE_MIN_CONNECTIONS"),
            connect_timeout_secs: parse_env_var("DATABASE_CONNECT_TIMEOUT_SECS"),
            acquire_timeout_secs: parse_env_var("DATABASE_ACQUIRE_TIMEOUT_SECS"),
            idle_timeout_secs: parse_env_var("DATABASE_IDLE_TIMEOUT_SECS"),
            sql_log: parse_env_var("DATABASE_SQL_LOG"),
        }
    }
}

fn parse_env_var<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    env::var(key).ok().and_then(|value| value.parse::<T>().ok())
}
