use crate::config::helpers::{ConfigSource, optional_env, parse_env, parse_list};
use crate::error::ConfigError;

const DEFAULT_CHAIN_ENDPOINT: &str = "https://api.mainnet.ultra.io";

/// Blockchain read-endpoint configuration and the on-chain tables the
/// reconciler scans.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Interchangeable RPC endpoints, tried in round-robin order.
    pub endpoints: Vec<String>,
    pub timeout_ms: u64,
    /// Rows requested per `get_table_rows` page.
    pub page_limit: u32,
    pub token_contract: String,
    /// Token tables scoped by account (v0 and v1 layouts).
    pub token_tables: Vec<String>,
    /// Factory tables scoped by the token contract, searched in order.
    pub factory_tables: Vec<String>,
    pub balance_contract: String,
    pub balance_table: String,
    pub currency_symbol: String,
}

impl ChainConfig {
    pub(crate) fn resolve(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let endpoints = optional_env(source, "CHAIN_ENDPOINTS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_else(|| vec![DEFAULT_CHAIN_ENDPOINT.to_string()]);
        if endpoints.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "CHAIN_ENDPOINTS".to_string(),
                message: "at least one endpoint is required".to_string(),
            });
        }
        for endpoint in &endpoints {
            let parsed = url::Url::parse(endpoint).map_err(|e| ConfigError::InvalidValue {
                key: "CHAIN_ENDPOINTS".to_string(),
                message: format!("'{endpoint}' is not a valid URL: {e}"),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidValue {
                    key: "CHAIN_ENDPOINTS".to_string(),
                    message: format!("'{endpoint}' must use http or https"),
                });
            }
        }

        let timeout_ms = parse_env(
            source,
            "CHAIN_TIMEOUT_MS",
            10_000u64,
            "must be a positive integer",
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAIN_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let page_limit = parse_env(source, "CHAIN_PAGE_LIMIT", 100u32, "must be a positive integer")?;
        if page_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAIN_PAGE_LIMIT".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            endpoints,
            timeout_ms,
            page_limit,
            ..Self::default()
        })
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_CHAIN_ENDPOINT.to_string()],
            timeout_ms: 10_000,
            page_limit: 100,
            token_contract: "eosio.nft.ft".to_string(),
            token_tables: vec!["token.a".to_string(), "token.b".to_string()],
            factory_tables: vec!["factory.a".to_string(), "factory.b".to_string()],
            balance_contract: "eosio.token".to_string(),
            balance_table: "accounts".to_string(),
            currency_symbol: "UOS".to_string(),
        }
    }
}
