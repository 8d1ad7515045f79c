//! JSON-RPC adapters for the per-chain bridge adapter services
//!
//! Each chain runs an adapter that exposes blocks, transactions and live
//! cells in the relayer's neutral model:
//!
//! | method                  | params                     | result              |
//! |-------------------------|----------------------------|---------------------|
//! | `get_tip_height`        | `[]`                       | `u64`               |
//! | `get_block_by_height`   | `[height]`                 | `Block \| null`     |
//! | `get_transaction`       | `[hash]`                   | `Transaction \| null` |
//! | `get_transaction_status`| `[hash]`                   | `TxStatus`          |
//! | `send_transaction`      | `[SignedTx]`               | `hash`              |
//! | `get_cells_by_owner`    | `[Script, min_value]`      | `[Cell]`            |
//! | `get_cells`             | `[SearchKey]`              | `[Cell]`            |
//! | `get_indexed_height`    | `[]`                       | `u64`               |

use super::{ChainClient, Collector, SearchKey};
use crate::error::{RelayerError, RelayerResult};
use crate::types::{Block, Cell, Chain, Script, SignedTx, Transaction, TxStatus, H256};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Shared HTTP transport for one adapter endpoint
#[derive(Clone, Debug)]
struct JsonRpcTransport {
    chain: Chain,
    url: String,
    http_client: reqwest::Client,
    request_id: Arc<AtomicU64>,
}

impl JsonRpcTransport {
    fn new(chain: Chain, url: &str, timeout: Duration) -> RelayerResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("http client for {chain}: {e}")))?;

        Ok(Self {
            chain,
            url: url.to_string(),
            http_client,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    fn unavailable(&self, message: impl ToString) -> RelayerError {
        RelayerError::RpcUnavailable {
            chain: self.chain,
            message: message.to_string(),
        }
    }

    /// Call `method`; a `null` result comes back as `None`
    async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> RelayerResult<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
        };
        trace!(chain = %self.chain, method, id = request.id, "RPC request");

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if response.status().is_server_error() {
            return Err(self.unavailable(format!("{method}: HTTP {}", response.status())));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("{method}: {e}")))?;

        if let Some(error) = body.error {
            return Err(RelayerError::Rpc {
                chain: self.chain,
                message: format!("{method}: {} (code {})", error.message, error.code),
            });
        }
        Ok(body.result)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RelayerResult<T> {
        self.call_optional(method, params).await?.ok_or_else(|| RelayerError::Rpc {
            chain: self.chain,
            message: format!("{method}: empty result"),
        })
    }
}

/// [`ChainClient`] backed by an adapter's JSON-RPC endpoint
#[derive(Clone, Debug)]
pub struct RpcChainClient {
    transport: JsonRpcTransport,
}

impl RpcChainClient {
    pub fn new(chain: Chain, url: &str, timeout: Duration) -> RelayerResult<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(chain, url, timeout)?,
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain(&self) -> Chain {
        self.transport.chain
    }

    async fn tip_height(&self) -> RelayerResult<u64> {
        self.transport.call("get_tip_height", json!([])).await
    }

    async fn block_by_height(&self, height: u64) -> RelayerResult<Option<Block>> {
        self.transport
            .call_optional("get_block_by_height", json!([height]))
            .await
    }

    async fn transaction(&self, hash: &H256) -> RelayerResult<Option<Transaction>> {
        self.transport
            .call_optional("get_transaction", json!([hash]))
            .await
    }

    async fn transaction_status(&self, hash: &H256) -> RelayerResult<TxStatus> {
        let status: Option<TxStatus> = self
            .transport
            .call_optional("get_transaction_status", json!([hash]))
            .await?;
        Ok(status.unwrap_or(TxStatus::Unknown))
    }

    async fn broadcast(&self, tx: &SignedTx) -> RelayerResult<H256> {
        self.transport.call("send_transaction", json!([tx])).await
    }
}

/// [`Collector`] backed by an adapter's indexer endpoint
#[derive(Clone, Debug)]
pub struct RpcCollector {
    transport: JsonRpcTransport,
}

impl RpcCollector {
    pub fn new(chain: Chain, url: &str, timeout: Duration) -> RelayerResult<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(chain, url, timeout)?,
        })
    }
}

#[async_trait]
impl Collector for RpcCollector {
    async fn cells_by_owner_and_min_value(
        &self,
        owner: &Script,
        min_value: u64,
    ) -> RelayerResult<Vec<Cell>> {
        self.transport
            .call("get_cells_by_owner", json!([owner, min_value]))
            .await
    }

    async fn cells_by_script(&self, key: &SearchKey) -> RelayerResult<Vec<Cell>> {
        self.transport.call("get_cells", json!([key])).await
    }

    async fn indexed_height(&self) -> RelayerResult<u64> {
        self.transport.call("get_indexed_height", json!([])).await
    }
}
