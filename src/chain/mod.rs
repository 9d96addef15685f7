//! Fault-tolerant access to a set of interchangeable chain read endpoints.
//!
//! Every request goes through [`ChainGateway::round_robin`], which starts at
//! the shared rotation cursor and walks the endpoint list until one answers.
//! The cursor is a best-effort hint: concurrent callers may race on it, and
//! the update rule only ever moves it forward or wraps it to zero.

pub mod rpc;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::ChainConfig;
use crate::error::ChainError;

pub use self::rpc::{ChainRpc, HttpChainRpc};
pub use self::types::{Asset, BalanceRow, TablePage, TableQuery, TokenRow, decode_rows};

pub struct ChainGateway {
    endpoints: Vec<Arc<dyn ChainRpc>>,
    cursor: AtomicUsize,
    config: ChainConfig,
}

impl ChainGateway {
    pub fn new(endpoints: Vec<Arc<dyn ChainRpc>>, config: ChainConfig) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            config,
        }
    }

    /// Build a gateway with one [`HttpChainRpc`] per configured endpoint.
    pub fn from_config(config: &ChainConfig) -> Result<Self, ChainError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let endpoints = config
            .endpoints
            .iter()
            .map(|url| HttpChainRpc::new(url, timeout).map(|rpc| Arc::new(rpc) as Arc<dyn ChainRpc>))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(ChainError::NoEndpoints);
        }
        Ok(Self::new(endpoints, config.clone()))
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Current rotation cursor.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Run `op` against each endpoint in rotation order until one succeeds.
    ///
    /// Fails with [`ChainError::Exhausted`] after every endpoint has been
    /// tried once from this call's perspective.
    pub async fn round_robin<T, F, Fut>(&self, op: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let n = self.endpoints.len();
        if n == 0 {
            return Err(ChainError::NoEndpoints);
        }

        let start = self.cursor() % n;
        let mut last = None;
        for attempt in 0..n {
            let idx = (start + attempt) % n;
            let endpoint = Arc::clone(&self.endpoints[idx]);
            match op(Arc::clone(&endpoint)).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        endpoint = endpoint.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "Chain endpoint failed, rotating"
                    );
                    self.advance_from(idx);
                    last = Some(e);
                }
            }
        }

        Err(ChainError::Exhausted {
            attempts: n,
            last: Box::new(last.unwrap_or(ChainError::NoEndpoints)),
        })
    }

    // Move the cursor past `failed` only if that moves it forward or wraps to 0.
    fn advance_from(&self, failed: usize) {
        let candidate = (failed + 1) % self.endpoints.len();
        let current = self.cursor.load(Ordering::Acquire);
        if candidate > current || candidate == 0 {
            // A lost race means another caller already rotated.
            let _ = self.cursor.compare_exchange(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    pub async fn get_accounts_by_key(&self, public_key: &str) -> Result<Vec<String>, ChainError> {
        self.round_robin(|rpc| async move { rpc.get_key_accounts(public_key).await })
            .await
    }

    pub async fn get_table_rows(
        &self,
        contract: &str,
        scope: &str,
        table: &str,
        lower_bound: Option<String>,
        upper_bound: Option<String>,
    ) -> Result<TablePage, ChainError> {
        let query = TableQuery::new(contract, scope, table, self.config.page_limit)
            .bounded(lower_bound, upper_bound);
        self.fetch_page(&query).await
    }

    async fn fetch_page(&self, query: &TableQuery) -> Result<TablePage, ChainError> {
        self.round_robin(|rpc| async move { rpc.get_table_rows(query).await })
            .await
    }

    /// Page sequence over a whole table.
    pub fn table_pages(&self, contract: &str, scope: &str, table: &str) -> TablePages<'_> {
        TablePages::new(
            self,
            TableQuery::new(contract, scope, table, self.config.page_limit),
        )
    }

    /// Every row of a table, or an error. Never a partial list.
    pub async fn get_all_table_rows(
        &self,
        contract: &str,
        scope: &str,
        table: &str,
    ) -> Result<Vec<serde_json::Value>, ChainError> {
        let mut pages = self.table_pages(contract, scope, table);
        let mut rows = Vec::new();
        while let Some(page) = pages.next_page().await {
            rows.extend(page?.rows);
        }
        Ok(rows)
    }

    /// Look up a token factory in the v0 table, then the v1 table.
    pub async fn find_factory(&self, factory_id: u64) -> Result<Option<serde_json::Value>, ChainError> {
        let contract = self.config.token_contract.as_str();
        for table in &self.config.factory_tables {
            let page = self
                .get_table_rows(
                    contract,
                    contract,
                    table,
                    Some(factory_id.to_string()),
                    Some(factory_id.to_string()),
                )
                .await?;
            if let Some(row) = page.rows.into_iter().find(|row| row_id(row) == Some(factory_id)) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

fn row_id(row: &serde_json::Value) -> Option<u64> {
    match row.get("id")? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Lazy, finite, restartable sequence of pages over one table.
pub struct TablePages<'a> {
    gateway: &'a ChainGateway,
    query: TableQuery,
    lower_bound: Option<String>,
    done: bool,
}

impl<'a> TablePages<'a> {
    fn new(gateway: &'a ChainGateway, query: TableQuery) -> Self {
        Self {
            gateway,
            lower_bound: query.lower_bound.clone(),
            query,
            done: false,
        }
    }

    /// Fetch the next page. `None` once the table is exhausted or after an error.
    pub async fn next_page(&mut self) -> Option<Result<TablePage, ChainError>> {
        if self.done {
            return None;
        }

        let query = self.query.clone().bounded(
            self.lower_bound.clone(),
            self.query.upper_bound.clone(),
        );
        let page = match self.gateway.fetch_page(&query).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if page.more {
            let stalled = page.next_key.is_empty()
                || self.lower_bound.as_deref() == Some(page.next_key.as_str());
            if stalled {
                self.done = true;
                return Some(Err(ChainError::PaginationStalled {
                    table: self.query.table.clone(),
                    key: page.next_key,
                }));
            }
            self.lower_bound = Some(page.next_key.clone());
        } else {
            self.done = true;
        }
        Some(Ok(page))
    }

    /// Start again from the first page.
    pub fn restart(&mut self) {
        self.lower_bound = self.query.lower_bound.clone();
        self.done = false;
    }
}
