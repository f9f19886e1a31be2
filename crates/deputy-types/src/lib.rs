use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Deputy error types.
#[derive(Debug, Error)]
pub enum DeputyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("checkpoint storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("checkpoint conflict for stream {stream_id}: expected {expected}, found {found}")]
    CheckpointConflict {
        stream_id: String,
        expected: Window,
        found: Window,
    },

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("extrinsic failed: {0}")]
    ExtrinsicFailed(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid window: from {from} > to {to}")]
    InvalidWindow { from: u64, to: u64 },

    #[error("invalid abi: {0}")]
    InvalidAbi(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("seed too short: minimum 16 characters required")]
    SeedTooShort,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DeputyError>;

/// An inclusive `[from_block, to_block]` block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub from_block: u64,
    pub to_block: u64,
}

impl Window {
    pub fn new(from_block: u64, to_block: u64) -> Result<Self> {
        if from_block > to_block {
            return Err(DeputyError::InvalidWindow { from: from_block, to: to_block });
        }
        Ok(Self { from_block, to_block })
    }

    /// Number of blocks covered by the window.
    pub fn block_count(&self) -> u64 {
        self.to_block - self.from_block + 1
    }

    /// The window of `window_size` blocks starting right after this one.
    pub fn following(&self, window_size: u64) -> Window {
        let from_block = self.to_block.saturating_add(1);
        let to_block = from_block.saturating_add(window_size.max(1) - 1);
        Window { from_block, to_block }
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from_block <= block && block <= self.to_block
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

/// Persisted cursor for one event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub stream_id: String,
    pub from_block: u64,
    pub to_block: u64,
}

impl Checkpoint {
    pub fn new(stream_id: impl Into<String>, window: Window) -> Self {
        Self {
            stream_id: stream_id.into(),
            from_block: window.from_block,
            to_block: window.to_block,
        }
    }

    pub fn window(&self) -> Window {
        Window { from_block: self.from_block, to_block: self.to_block }
    }
}

/// A raw contract log as returned by the explorer's `getLogs` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub address: Hex,
    pub topics: Vec<Hex>,
    pub data: Hex,
    #[serde(deserialize_with = "de_hex_quantity")]
    pub block_number: u64,
    #[serde(
        default,
        deserialize_with = "de_opt_hex_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_stamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<Hex>,
    #[serde(
        default,
        deserialize_with = "de_opt_hex_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_index: Option<u64>,
    #[serde(
        default,
        deserialize_with = "de_opt_hex_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_index: Option<u64>,
}

impl LogRecord {
    /// The event-signature hash (topic 0), if the log is not anonymous.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// Logs fetched for one window. May be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBatch {
    pub window: Window,
    pub logs: Vec<LogRecord>,
}

impl LogBatch {
    pub fn new(window: Window, logs: Vec<LogRecord>) -> Self {
        Self { window, logs }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }
}

/// Classified result of a relay submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Reached finality; `success` is false when the chain reported the
    /// extrinsic as failed (the nonce was still consumed).
    Finalized { success: bool },
    /// Refused before finality.
    Rejected(String),
    /// Connectivity or encoding failure; the effect is unknown.
    TransportError(String),
}

impl SubmissionOutcome {
    /// Only a successful finalized submission clears a window.
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Finalized { success: true })
    }

    /// Short label used in log records.
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Finalized { success: true } => "finalized",
            SubmissionOutcome::Finalized { success: false } => "extrinsic_failed",
            SubmissionOutcome::Rejected(_) => "rejected",
            SubmissionOutcome::TransportError(_) => "transport_error",
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionOutcome::Rejected(reason) | SubmissionOutcome::TransportError(reason) => {
                write!(f, "{}: {}", self.label(), reason)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Parse a hex quantity such as `"0x1a"`. The explorer encodes zero as `"0x"`.
pub fn parse_hex_u64(s: &str) -> Result<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| DeputyError::InvalidHex(format!("{}: {}", s, e)))
}

/// Format a number as a 0x-prefixed hex quantity.
pub fn u64_to_hex(n: u64) -> Hex {
    format!("0x{:x}", n)
}

/// Parse a hex string to a byte vector.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| DeputyError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Hex-encode a UTF-8 string (`"infura"` -> `"0x696e66757261"`).
pub fn string_to_hex(s: &str) -> Hex {
    bytes_to_hex(s.as_bytes())
}

fn de_hex_quantity<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    let s = String::deserialize(d)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn de_opt_hex_quantity<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(s) => parse_hex_u64(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
