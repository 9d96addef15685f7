//! HTTP transport for a single chain read endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::chain::types::{KeyAccountsResponse, TablePage, TableQuery};
use crate::error::ChainError;

/// One read-only chain endpoint.
///
/// The gateway holds several of these and rotates among them on failure.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Endpoint label used in logs and errors.
    fn name(&self) -> &str;

    /// Accounts controlled by `public_key`.
    async fn get_key_accounts(&self, public_key: &str) -> Result<Vec<String>, ChainError>;

    /// A single page of contract table rows.
    async fn get_table_rows(&self, query: &TableQuery) -> Result<TablePage, ChainError>;
}

/// reqwest-backed [`ChainRpc`] for a nodeos-compatible HTTP API.
pub struct HttpChainRpc {
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct KeyAccountsRequest<'a> {
    public_key: &'a str,
}

impl HttpChainRpc {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::RequestFailed {
                endpoint: base_url.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ChainError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::RequestFailed {
                endpoint: self.base_url.clone(),
                reason: if e.is_timeout() {
                    "timed out".to_string()
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::HttpStatus {
                endpoint: self.base_url.clone(),
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ChainError::Decode(format!("{path} from {}: {e}", self.base_url)))
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn get_key_accounts(&self, public_key: &str) -> Result<Vec<String>, ChainError> {
        let response: KeyAccountsResponse = self
            .post(
                "/v1/history/get_key_accounts",
                &KeyAccountsRequest { public_key },
            )
            .await?;
        Ok(response.account_names)
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TablePage, ChainError> {
        self.post("/v1/chain/get_table_rows", query).await
    }
}
