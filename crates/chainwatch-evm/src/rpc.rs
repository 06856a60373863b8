//! HTTP JSON-RPC chain source backed by `reqwest`.
//!
//! Methods used:
//! - `eth_blockNumber`
//! - `eth_getBlockByNumber` (full transaction objects; `null` = not yet produced)
//! - `eth_getTransactionReceipt`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, B256, U64};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainwatch_core::error::WatchError;

use crate::source::{BlockFetch, ChainSource, RawLog, SourceBlock};

// ─── JSON-RPC wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value; `Value::Null` when the node answered `null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Block as returned by `eth_getBlockByNumber(_, true)`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: U64,
    hash: B256,
    parent_hash: B256,
    timestamp: U64,
    miner: Address,
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    #[serde(default)]
    logs: Vec<RawLog>,
}

/// Decode an `eth_getBlockByNumber` result.
pub fn parse_block(value: Value) -> Result<BlockFetch, WatchError> {
    if value.is_null() {
        return Ok(BlockFetch::NotYetProduced);
    }
    let block: RpcBlock =
        serde_json::from_value(value).map_err(|e| WatchError::Decode(format!("block: {e}")))?;

    let number = block.number.to::<u64>();
    let transactions = block
        .transactions
        .into_iter()
        .enumerate()
        .map(|(position, tx)| {
            serde_json::from_value::<TxEnvelope>(tx).map_err(|e| {
                WatchError::Decode(format!("transaction {position} of block {number}: {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BlockFetch::Produced(SourceBlock {
        number,
        hash: block.hash,
        parent_hash: block.parent_hash,
        timestamp: block.timestamp.to::<u64>(),
        beneficiary: block.miner,
        transactions,
    }))
}

// ─── HttpChainSource ──────────────────────────────────────────────────────────

/// `ChainSource` over an HTTP JSON-RPC endpoint.
pub struct HttpChainSource {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpChainSource {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, WatchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| WatchError::Connectivity(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(WatchError::Connectivity(format!("{method}: HTTP {status}: {body}")));
        }

        let resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| WatchError::Decode(format!("{method}: {e}")))?;

        tracing::trace!(method, id, "rpc call complete");
        resp.into_result()
            .map_err(|e| WatchError::Connectivity(format!("{method}: {e}")))
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, WatchError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| WatchError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn head_height(&self) -> Result<u64, WatchError> {
        let head: U64 = self.call_typed("eth_blockNumber", vec![]).await?;
        Ok(head.to::<u64>())
    }

    async fn block_at(&self, height: u64) -> Result<BlockFetch, WatchError> {
        let value = self
            .call("eth_getBlockByNumber", vec![json!(format!("{height:#x}")), json!(true)])
            .await?;
        parse_block(value)
    }

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, WatchError> {
        let receipt: Option<RpcReceipt> = self
            .call_typed("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        Ok(receipt.map(|r| r.logs))
    }
}
