//! Relay transaction building and submission.
//!
//! - Build the relay call for a window (event summary or fetch instruction)
//! - Sign it with the relaying account's nonce
//! - Submit to the downstream chain and classify the finality outcome

use std::sync::Arc;

use async_trait::async_trait;
use deputy_crypto::abi::keccak256_hex;
use deputy_crypto::{EventTable, RelayKeyPair};
use deputy_types::{string_to_hex, u64_to_hex, DeputyError, Hex, LogBatch, Result, Window};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod chain_client;
pub mod pipeline;

pub use chain_client::HttpChainClient;
pub use pipeline::{FailureMarker, SubmissionPipeline};

/// Downstream pallet receiving relay calls.
pub const ORACLE_SECTION: &str = "oracle";

/// One upstream log, annotated with its event name when the ABI knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayedEvent {
    pub name: Option<String>,
    pub address: Hex,
    pub topics: Vec<Hex>,
    pub data: Hex,
    pub block_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<Hex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,
}

/// What a relay transaction tells the downstream chain about a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayPayload {
    /// Ask the chain's oracle to fetch the window itself.
    FetchInstruction {
        source_name: String,
        url: String,
        request: String,
    },
    /// Carry the decoded logs of the window directly.
    EventSummary {
        window: Window,
        events: Vec<RelayedEvent>,
    },
}

impl RelayPayload {
    /// Fetch instruction for `window`: a JSON-RPC `eth_getLogs` body
    /// addressed to `url`. Depends only on the window, never on the batch.
    pub fn fetch_instruction(
        source_name: &str,
        url: &str,
        contract_address: &str,
        window: Window,
    ) -> Self {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getLogs",
            "params": [{
                "address": contract_address,
                "fromBlock": u64_to_hex(window.from_block),
                "toBlock": u64_to_hex(window.to_block),
            }],
            "id": 1,
        });
        RelayPayload::FetchInstruction {
            source_name: source_name.to_string(),
            url: url.to_string(),
            request: request.to_string(),
        }
    }

    /// Event summary for a fetched batch.
    pub fn event_summary(batch: &LogBatch, events: &EventTable) -> Self {
        let events = batch
            .logs
            .iter()
            .map(|log| RelayedEvent {
                name: log.topic0().and_then(|t| events.event_name(t)).map(str::to_string),
                address: log.address.clone(),
                topics: log.topics.clone(),
                data: log.data.clone(),
                block_number: log.block_number,
                transaction_hash: log.transaction_hash.clone(),
                log_index: log.log_index,
            })
            .collect();
        RelayPayload::EventSummary { window: batch.window, events }
    }

    /// Encode as a downstream call.
    pub fn into_call(self) -> Result<RelayCall> {
        match self {
            RelayPayload::FetchInstruction { source_name, url, request } => Ok(RelayCall {
                section: ORACLE_SECTION.to_string(),
                method: "kickoff".to_string(),
                args: vec![
                    string_to_hex(&source_name),
                    string_to_hex(&url),
                    string_to_hex(&request),
                ],
            }),
            summary @ RelayPayload::EventSummary { .. } => {
                let body = serde_json::to_string(&summary).map_err(|e| {
                    DeputyError::Other(format!("failed to encode event summary: {}", e))
                })?;
                Ok(RelayCall {
                    section: ORACLE_SECTION.to_string(),
                    method: "relay_events".to_string(),
                    args: vec![string_to_hex(&body)],
                })
            }
        }
    }
}

/// A downstream call: `section.method(args...)` with hex-encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCall {
    pub section: String,
    pub method: String,
    pub args: Vec<Hex>,
}

impl RelayCall {
    pub fn encode(&self) -> Vec<u8> {
        // struct of strings; serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A relay call signed by the relaying account for a specific nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedExtrinsic {
    pub signer: Hex,
    pub nonce: u64,
    pub call: RelayCall,
    pub signature: Hex,
}

impl SignedExtrinsic {
    /// Bytes covered by the signature: little-endian nonce followed by the encoded call.
    pub fn signing_payload(nonce: u64, call: &RelayCall) -> Vec<u8> {
        let mut payload = nonce.to_le_bytes().to_vec();
        payload.extend_from_slice(&call.encode());
        payload
    }

    pub fn sign(signer: &RelayKeyPair, nonce: u64, call: RelayCall) -> Self {
        let signature = signer.sign(&Self::signing_payload(nonce, &call));
        Self { signer: signer.address(), nonce, call, signature }
    }

    pub fn verify(&self) -> Result<bool> {
        deputy_crypto::keys::verify(
            &self.signer,
            &Self::signing_payload(self.nonce, &self.call),
            &self.signature,
        )
    }

    pub fn hash(&self) -> Hex {
        let mut bytes = Self::signing_payload(self.nonce, &self.call);
        bytes.extend_from_slice(self.signature.as_bytes());
        keccak256_hex(&bytes)
    }
}

/// An event emitted by the downstream chain while applying an extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub section: String,
    pub method: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Lifecycle of a submitted extrinsic as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    Ready,
    Broadcast,
    InBlock { block_hash: Hex },
    Retracted { block_hash: Hex },
    Finalized { block_hash: Hex, events: Vec<ChainEvent> },
    Usurped { by: Hex },
    Dropped,
    Invalid { reason: String },
    Error { reason: String },
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TxStatus::Ready
                | TxStatus::Broadcast
                | TxStatus::InBlock { .. }
                | TxStatus::Retracted { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TxStatus::Ready => "ready",
            TxStatus::Broadcast => "broadcast",
            TxStatus::InBlock { .. } => "in_block",
            TxStatus::Retracted { .. } => "retracted",
            TxStatus::Finalized { .. } => "finalized",
            TxStatus::Usurped { .. } => "usurped",
            TxStatus::Dropped => "dropped",
            TxStatus::Invalid { .. } => "invalid",
            TxStatus::Error { .. } => "error",
        }
    }
}

/// Downstream chain access.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next nonce for `address`, including transactions still pending in the pool.
    async fn account_nonce(&self, address: &str) -> Result<u64>;

    /// Submit a signed extrinsic and return its status stream.
    ///
    /// `Err` means the submission never reached the chain.
    async fn submit(&self, extrinsic: SignedExtrinsic) -> Result<mpsc::Receiver<TxStatus>>;
}

/// Reads the relaying account's nonce. Never caches: other parties may
/// have submitted for the same account since the last cycle.
pub struct NonceTracker {
    chain: Arc<dyn ChainClient>,
}

impl NonceTracker {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    pub async fn current_nonce(&self, account: &str) -> Result<u64> {
        self.chain.account_nonce(account).await
    }
}
