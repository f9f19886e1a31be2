//! HTTP client for the block-explorer REST API.
//!
//! Endpoints:
//! - GET /api?module=proxy&action=eth_blockNumber
//! - GET /api?module=logs&action=getLogs&fromBlock=&toBlock=&address=
//! - GET /api?module=contract&action=getabi&address=

use async_trait::async_trait;
use deputy_crypto::AbiDescriptor;
use deputy_types::{parse_hex_u64, DeputyError, LogBatch, LogRecord, Result, Window};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::{HeightOracle, LogFetcher};

const MESSAGE_OK: &str = "OK";
const MESSAGE_NO_RECORDS: &str = "No records found";

/// Explorer `module=logs` / `module=contract` response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerResponse {
    pub status: Option<String>,
    pub message: String,
    pub result: serde_json::Value,
}

/// Explorer `module=proxy` response (JSON-RPC passthrough).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

/// Decode an `eth_blockNumber` proxy response into a height.
pub fn parse_height(body: &str) -> Result<u64> {
    let resp: ProxyResponse = serde_json::from_str(body)
        .map_err(|e| DeputyError::Transport(format!("failed to parse height response: {}", e)))?;

    if let Some(err) = resp.error {
        return Err(DeputyError::Transport(format!("explorer proxy error: {}", err)));
    }
    match resp.result {
        Some(serde_json::Value::String(hex)) => parse_hex_u64(&hex)
            .map_err(|e| DeputyError::Transport(format!("bad height {}: {}", hex, e))),
        other => Err(DeputyError::Transport(format!(
            "unexpected height result: {}",
            other.unwrap_or(serde_json::Value::Null)
        ))),
    }
}

/// Decode a `getLogs` response. Only `message == "OK"` carries logs; the
/// explorer's explicit empty reply is an empty list; anything else fails.
pub fn parse_logs(body: &str) -> Result<Vec<LogRecord>> {
    let resp: ExplorerResponse = serde_json::from_str(body)
        .map_err(|e| DeputyError::Transport(format!("failed to parse logs response: {}", e)))?;

    match resp.message.as_str() {
        MESSAGE_OK => serde_json::from_value(resp.result)
            .map_err(|e| DeputyError::Transport(format!("malformed log records: {}", e))),
        MESSAGE_NO_RECORDS if resp.result.as_array().is_some_and(|a| a.is_empty()) => {
            Ok(Vec::new())
        }
        other => Err(DeputyError::Transport(format!(
            "getLogs returned message {:?}: {}",
            other, resp.result
        ))),
    }
}

/// Decode a `getabi` response. The ABI itself arrives as a JSON string.
pub fn parse_abi(body: &str) -> Result<AbiDescriptor> {
    let resp: ExplorerResponse = serde_json::from_str(body)
        .map_err(|e| DeputyError::Transport(format!("failed to parse abi response: {}", e)))?;

    if resp.message != MESSAGE_OK {
        return Err(DeputyError::Transport(format!(
            "getabi returned message {:?}: {}",
            resp.message, resp.result
        )));
    }
    match resp.result {
        serde_json::Value::String(abi) => AbiDescriptor::from_json(&abi),
        other => Err(DeputyError::InvalidAbi(format!("expected abi string, got {}", other))),
    }
}

/// Explorer REST client.
pub struct ExplorerClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ExplorerClient {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(20_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<String> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        let resp = self.client
            .get(format!("{}/api", self.base_url))
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DeputyError::Transport(format!("explorer request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(DeputyError::Transport(format!(
                "explorer returned status {}",
                resp.status()
            )));
        }

        resp.text()
            .await
            .map_err(|e| DeputyError::Transport(format!("failed to read explorer response: {}", e)))
    }

    /// GET /api?module=proxy&action=eth_blockNumber
    pub async fn latest_height(&self) -> Result<u64> {
        let body = self
            .get(&[("module", "proxy".into()), ("action", "eth_blockNumber".into())])
            .await?;
        parse_height(&body)
    }

    /// GET /api?module=logs&action=getLogs&fromBlock=F&toBlock=T&address=ADDR
    pub async fn get_logs(&self, contract_address: &str, window: Window) -> Result<Vec<LogRecord>> {
        let body = self
            .get(&[
                ("module", "logs".into()),
                ("action", "getLogs".into()),
                ("fromBlock", window.from_block.to_string()),
                ("toBlock", window.to_block.to_string()),
                ("address", contract_address.to_string()),
            ])
            .await?;
        let logs = parse_logs(&body)?;
        debug!(contract = contract_address, %window, count = logs.len(), "fetched logs");
        Ok(logs)
    }

    /// GET /api?module=contract&action=getabi&address=ADDR
    pub async fn get_abi(&self, contract_address: &str) -> Result<AbiDescriptor> {
        let body = self
            .get(&[
                ("module", "contract".into()),
                ("action", "getabi".into()),
                ("address", contract_address.to_string()),
            ])
            .await?;
        parse_abi(&body)
    }
}

#[async_trait]
impl HeightOracle for ExplorerClient {
    async fn current_height(&self) -> Result<u64> {
        self.latest_height().await
    }
}

#[async_trait]
impl LogFetcher for ExplorerClient {
    async fn fetch_logs(&self, contract_address: &str, window: Window) -> Result<LogBatch> {
        let logs = self.get_logs(contract_address, window).await?;
        Ok(LogBatch::new(window, logs))
    }

    async fn fetch_abi(&self, contract_address: &str) -> Result<AbiDescriptor> {
        self.get_abi(contract_address).await
    }
}
