//! Relay configuration: one `StreamConfig` per monitored contract, each with
//! its own signing account, plus the endpoints shared by every stream.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use deputy_crypto::RelayKeyPair;
use deputy_tx::FailureMarker;
use deputy_types::{DeputyError, Result};
use serde::{Deserialize, Serialize};

/// How a window is described to the downstream chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PayloadMode {
    /// Post the decoded logs of the window.
    #[default]
    EventSummary,
    /// Ask the chain's oracle to fetch the window from `rpc_url` itself.
    FetchInstruction { source_name: String, rpc_url: String },
}

/// Configuration for a single relayed event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: String,
    pub contract_address: String,
    /// Key file of the account signing this stream's relay calls.
    pub key_file: PathBuf,
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_finality_timeout_ms")]
    pub finality_timeout_ms: u64,
    /// First block of the seeded window, instead of deriving it from the tip.
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub payload: PayloadMode,
    /// Chain event marking a finalized-but-failed relay call.
    #[serde(default)]
    pub failure_marker: FailureMarker,
}

fn default_window_size() -> u64 {
    StreamConfig::DEFAULT_WINDOW_SIZE
}

fn default_confirmation_depth() -> u64 {
    StreamConfig::DEFAULT_CONFIRMATION_DEPTH
}

fn default_poll_interval_ms() -> u64 {
    StreamConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_finality_timeout_ms() -> u64 {
    StreamConfig::DEFAULT_FINALITY_TIMEOUT.as_millis() as u64
}

impl StreamConfig {
    /// Default blocks per window (12).
    pub const DEFAULT_WINDOW_SIZE: u64 = 12;

    /// Default blocks kept behind the upstream tip (12).
    pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 12;

    /// Default pause between cycles (9 seconds).
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(9);

    /// Default wait for downstream finality (120 seconds).
    pub const DEFAULT_FINALITY_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(stream_id: &str, contract_address: &str, key_file: impl Into<PathBuf>) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            contract_address: contract_address.to_string(),
            key_file: key_file.into(),
            window_size: Self::DEFAULT_WINDOW_SIZE,
            confirmation_depth: Self::DEFAULT_CONFIRMATION_DEPTH,
            poll_interval_ms: default_poll_interval_ms(),
            finality_timeout_ms: default_finality_timeout_ms(),
            start_block: None,
            payload: PayloadMode::default(),
            failure_marker: FailureMarker::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            return Err(DeputyError::Config("stream_id must not be empty".into()));
        }
        if self.contract_address.trim().is_empty() {
            return Err(DeputyError::Config(format!(
                "stream {}: contract_address must not be empty",
                self.stream_id
            )));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(DeputyError::Config(format!(
                "stream {}: key_file must not be empty",
                self.stream_id
            )));
        }
        if self.window_size == 0 {
            return Err(DeputyError::Config(format!(
                "stream {}: window_size must be at least 1",
                self.stream_id
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(DeputyError::Config(format!(
                "stream {}: poll_interval_ms must be positive",
                self.stream_id
            )));
        }
        if let PayloadMode::FetchInstruction { source_name, rpc_url } = &self.payload {
            if source_name.is_empty() || rpc_url.is_empty() {
                return Err(DeputyError::Config(format!(
                    "stream {}: fetch_instruction needs source_name and rpc_url",
                    self.stream_id
                )));
            }
        }
        Ok(())
    }
}

/// Upstream explorer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Downstream chain gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub base_url: String,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub status_poll_ms: Option<u64>,
}

/// Top-level relay configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub explorer: ExplorerConfig,
    pub chain: ChainConfig,
    pub store_dir: PathBuf,
    pub streams: Vec<StreamConfig>,
}

impl RelayConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(raw)
            .map_err(|e| DeputyError::Config(format!("invalid relay config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeputyError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(DeputyError::Config("no streams configured".into()));
        }
        let mut seen = HashSet::new();
        let mut key_files = HashMap::new();
        for stream in &self.streams {
            stream.validate()?;
            if !seen.insert(stream.stream_id.as_str()) {
                return Err(DeputyError::Config(format!(
                    "duplicate stream_id {}",
                    stream.stream_id
                )));
            }
            if let Some(other) = key_files.insert(&stream.key_file, stream.stream_id.as_str()) {
                return Err(DeputyError::Config(format!(
                    "streams {} and {} share key file {}",
                    other,
                    stream.stream_id,
                    stream.key_file.display()
                )));
            }
        }
        Ok(())
    }

    /// Load each stream's signing key, in stream order.
    ///
    /// Nonces are read fresh per cycle without locking, so two streams must
    /// never sign with the same account.
    pub fn load_signers(&self) -> Result<Vec<RelayKeyPair>> {
        let mut owners: HashMap<String, &str> = HashMap::new();
        let mut signers = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            let signer = RelayKeyPair::from_key_file(&stream.key_file)?;
            if let Some(other) = owners.insert(signer.address(), stream.stream_id.as_str()) {
                return Err(DeputyError::Config(format!(
                    "streams {} and {} share signing account {}",
                    other,
                    stream.stream_id,
                    signer.address()
                )));
            }
            signers.push(signer);
        }
        Ok(signers)
    }

    pub fn stream(&self, stream_id: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.stream_id == stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "explorer": { "base_url": "https://api-cn.etherscan.com", "api_key": "KEY" },
        "chain": { "base_url": "http://127.0.0.1:8080" },
        "store_dir": "./checkpoints",
        "streams": [
            { "stream_id": "htlc_events",
              "contract_address": "0x2dc6af9155ec0285d3db407c17273db9f9dc84b6",
              "key_file": "keys/htlc.json",
              "payload": { "mode": "fetch_instruction", "source_name": "infura",
                           "rpc_url": "https://mainnet.infura.io/v3/x" } },
            { "stream_id": "swap_events",
              "contract_address": "0xbd261550e087f19a842e375d0031a85525b9714f",
              "key_file": "keys/swap.json", "window_size": 50, "start_block": 6941790,
              "failure_marker": { "section": "swap", "method": "RelayFailed" } }
        ]
    }"#;

    #[test]
    fn test_defaults_applied() {
        let config = RelayConfig::from_json(SAMPLE).unwrap();
        let htlc = config.stream("htlc_events").unwrap();
        assert_eq!(htlc.window_size, 12);
        assert_eq!(htlc.confirmation_depth, 12);
        assert_eq!(htlc.poll_interval(), Duration::from_secs(9));
        assert_eq!(htlc.finality_timeout(), Duration::from_secs(120));
        assert!(matches!(htlc.payload, PayloadMode::FetchInstruction { .. }));

        let swap = config.stream("swap_events").unwrap();
        assert_eq!(swap.window_size, 50);
        assert_eq!(swap.start_block, Some(6941790));
        assert_eq!(swap.payload, PayloadMode::EventSummary);
        assert_eq!(swap.failure_marker, FailureMarker::new("swap", "RelayFailed"));
        assert_eq!(htlc.failure_marker, FailureMarker::new("system", "ExtrinsicFailed"));
    }

    #[test]
    fn test_duplicate_stream_rejected() {
        let raw = SAMPLE.replace("swap_events", "htlc_events");
        assert!(matches!(RelayConfig::from_json(&raw), Err(DeputyError::Config(_))));
    }

    #[test]
    fn test_shared_key_file_rejected() {
        let raw = SAMPLE.replace("keys/swap.json", "keys/htlc.json");
        assert!(matches!(RelayConfig::from_json(&raw), Err(DeputyError::Config(_))));
    }

    fn write_key(dir: &Path, name: &str, seed: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::json!({ "seed": seed }).to_string()).unwrap();
        path
    }

    fn two_streams(htlc_key: PathBuf, swap_key: PathBuf) -> RelayConfig {
        let mut config = RelayConfig::from_json(SAMPLE).unwrap();
        config.streams[0].key_file = htlc_key;
        config.streams[1].key_file = swap_key;
        config
    }

    #[test]
    fn test_signers_loaded_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let htlc = write_key(dir.path(), "htlc.json", "bottom drive obey lake curtain smoke");
        let swap = write_key(dir.path(), "swap.json", "basket hold race lonely fit walk");

        let signers = two_streams(htlc, swap).load_signers().unwrap();
        assert_eq!(signers.len(), 2);
        assert_ne!(signers[0].address(), signers[1].address());
    }

    #[test]
    fn test_shared_signing_account_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // same seed behind two different paths
        let htlc = write_key(dir.path(), "htlc.json", "bottom drive obey lake curtain smoke");
        let swap = write_key(dir.path(), "swap.json", "bottom drive obey lake curtain smoke");

        let err = two_streams(htlc, swap).load_signers().unwrap_err();
        assert!(matches!(err, DeputyError::Config(msg) if msg.contains("share signing account")));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut stream = StreamConfig::new("s", "0xabc", "keys/s.json");
        stream.window_size = 0;
        assert!(stream.validate().is_err());

        stream.window_size = 1;
        stream.poll_interval_ms = 0;
        assert!(stream.validate().is_err());
    }

    #[test]
    fn test_fetch_instruction_requires_url() {
        let mut stream = StreamConfig::new("s", "0xabc", "keys/s.json");
        stream.payload = PayloadMode::FetchInstruction {
            source_name: "infura".into(),
            rpc_url: String::new(),
        };
        assert!(stream.validate().is_err());
    }
}
