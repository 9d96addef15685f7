//! Wire types for EOSIO-style chain RPC.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// Request body for `/v1/chain/get_table_rows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableQuery {
    pub code: String,
    pub scope: String,
    pub table: String,
    pub json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<String>,
    pub limit: u32,
}

impl TableQuery {
    pub fn new(contract: &str, scope: &str, table: &str, limit: u32) -> Self {
        Self {
            code: contract.to_string(),
            scope: scope.to_string(),
            table: table.to_string(),
            json: true,
            lower_bound: None,
            upper_bound: None,
            limit,
        }
    }

    pub fn bounded(mut self, lower: Option<String>, upper: Option<String>) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }
}

/// One page of table rows.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TablePage {
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub more: bool,
    /// Continuation key for the next page. Empty when `more` is false.
    #[serde(default, deserialize_with = "deserialize_next_key")]
    pub next_key: String,
}

// Nodes answer `next_key` as either a string or a bare number.
fn deserialize_next_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct KeyAccountsResponse {
    #[serde(default)]
    pub account_names: Vec<String>,
}

/// Row of the `token.a` / `token.b` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRow {
    pub token_factory_id: u64,
}

/// Row of the `eosio.token` `accounts` table.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceRow {
    pub balance: String,
}

/// A parsed asset string such as `"123.45000000 UOS"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub amount: Decimal,
    pub symbol: String,
}

impl FromStr for Asset {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(symbol), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ChainError::Decode(format!("malformed asset '{s}'")));
        };
        let amount = Decimal::from_str(amount)
            .map_err(|e| ChainError::Decode(format!("bad asset amount '{amount}': {e}")))?;
        Ok(Self {
            amount,
            symbol: symbol.to_string(),
        })
    }
}

/// Decode table rows into typed records.
pub fn decode_rows<T: serde::de::DeserializeOwned>(
    rows: &[serde_json::Value],
) -> Result<Vec<T>, ChainError> {
    rows.iter()
        .map(|row| {
            serde_json::from_value(row.clone())
                .map_err(|e| ChainError::Decode(format!("unexpected row shape: {e}")))
        })
        .collect()
}
