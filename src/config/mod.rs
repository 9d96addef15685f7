//! Configuration for uos-linker.
//!
//! Everything comes from environment variables. `.env` files are loaded by
//! [`crate::bootstrap`] before resolution, so the effective priority is
//! explicit env vars > `./.env` > `~/.uos-linker/.env` > defaults.

mod chain;
pub(crate) mod helpers;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub use self::chain::ChainConfig;
pub use self::helpers::{ConfigSource, EnvSource};
use self::helpers::{optional_env, parse_env, required_env};

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub discord: DiscordConfig,
    pub chain: ChainConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub refresh: RefreshConfig,
    pub challenge: ChallengeConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub bot_token: SecretString,
    pub application_id: Option<String>,
    pub guild_id: String,
    pub api_base_url: String,
}

/// Callback server and signing-page addressing.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host name or full URL under which this server is reachable.
    pub cname: String,
    /// Host name or full URL of the signing page.
    pub signing_cname: String,
    /// Port of the signing page dev server.
    pub vite_port: u16,
    pub dev_mode: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Period between role sweeps.
    pub interval: Duration,
    /// Delay between dispatching consecutive user refreshes within a sweep.
    pub single_user_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'pretty' or 'json', got '{value}'"),
            }),
        }
    }
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env(dev_mode: bool) -> Result<Self, ConfigError> {
        Self::resolve(&EnvSource, dev_mode)
    }

    pub fn resolve(source: &dyn ConfigSource, dev_mode: bool) -> Result<Self, ConfigError> {
        let discord = DiscordConfig {
            bot_token: SecretString::from(required_env(
                source,
                "DISCORD_BOT_TOKEN",
                "Create a bot in the Discord developer portal and set its token.",
            )?),
            application_id: optional_env(source, "APPLICATION_ID"),
            guild_id: required_env(
                source,
                "GUILD_ID",
                "Set the id of the guild whose roles this bot manages.",
            )?,
            api_base_url: optional_env(source, "DISCORD_API_BASE_URL")
                .unwrap_or_else(|| "https://discord.com/api/v10".to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let server = ServerConfig {
            host: optional_env(source, "WEBSERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env(source, "WEBSERVER_PORT", 3000u16, "must be a valid port number")?,
            cname: optional_env(source, "CNAME").unwrap_or_else(|| "localhost".to_string()),
            signing_cname: optional_env(source, "SIGNING_CNAME")
                .unwrap_or_else(|| "https://discord.ultra.io/".to_string()),
            vite_port: parse_env(source, "VITE_PORT", 3102u16, "must be a valid port number")?,
            dev_mode,
        };

        let database = DatabaseConfig {
            path: optional_env(source, "LIBSQL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
        };

        let interval_secs = parse_env(
            source,
            "REFRESH_INTERVAL_SECS",
            60u64,
            "must be a positive integer",
        )?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REFRESH_INTERVAL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        let refresh = RefreshConfig {
            interval: Duration::from_secs(interval_secs),
            single_user_delay: Duration::from_millis(parse_env(
                source,
                "SINGLE_USER_REFRESH_INTERVAL_MS",
                50u64,
                "must be a non-negative integer",
            )?),
        };

        let ttl_secs = parse_env(source, "CHALLENGE_TTL_SECS", 300u64, "must be a positive integer")?;
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHALLENGE_TTL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let log_format = LogFormat::parse(
            &optional_env(source, "LOG_FORMAT").unwrap_or_else(|| "pretty".to_string()),
            "LOG_FORMAT",
        )?;

        Ok(Self {
            discord,
            chain: ChainConfig::resolve(source)?,
            server,
            database,
            refresh,
            challenge: ChallengeConfig {
                ttl: Duration::from_secs(ttl_secs),
            },
            log_format,
        })
    }
}

/// Default database location (~/.uos-linker/uos-linker.db).
fn default_database_path() -> PathBuf {
    crate::bootstrap::uos_linker_home().join("uos-linker.db")
}
