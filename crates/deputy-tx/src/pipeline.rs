//! Submit a relay call and classify what the chain did with it.

use std::sync::Arc;
use std::time::Duration;

use deputy_crypto::RelayKeyPair;
use deputy_types::SubmissionOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{ChainClient, ChainEvent, RelayCall, SignedExtrinsic, TxStatus};

/// The chain event marking a finalized-but-failed extrinsic.
///
/// Matched on the full `(section, method)` identity; a substring match
/// would also fire on unrelated events whose names merely contain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMarker {
    pub section: String,
    pub method: String,
}

impl FailureMarker {
    pub fn new(section: &str, method: &str) -> Self {
        Self { section: section.to_string(), method: method.to_string() }
    }

    pub fn matches(&self, event: &ChainEvent) -> bool {
        event.section == self.section && event.method == self.method
    }
}

impl Default for FailureMarker {
    fn default() -> Self {
        Self::new("system", "ExtrinsicFailed")
    }
}

/// Signs, submits and awaits finality of relay calls.
pub struct SubmissionPipeline {
    chain: Arc<dyn ChainClient>,
    failure_marker: FailureMarker,
    finality_timeout: Duration,
}

impl SubmissionPipeline {
    /// Default wait for finality (120 seconds).
    pub const DEFAULT_FINALITY_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            failure_marker: FailureMarker::default(),
            finality_timeout: Self::DEFAULT_FINALITY_TIMEOUT,
        }
    }

    pub fn with_failure_marker(mut self, marker: FailureMarker) -> Self {
        self.failure_marker = marker;
        self
    }

    pub fn with_finality_timeout(mut self, timeout: Duration) -> Self {
        self.finality_timeout = timeout;
        self
    }

    /// Sign `call` for `nonce`, submit it and wait for a terminal status.
    ///
    /// Returns exactly one outcome per call; the status stream is consumed.
    pub async fn submit(
        &self,
        signer: &RelayKeyPair,
        nonce: u64,
        call: RelayCall,
    ) -> SubmissionOutcome {
        let extrinsic = SignedExtrinsic::sign(signer, nonce, call);
        let hash = extrinsic.hash();
        debug!(%hash, nonce, method = %extrinsic.call.method, "submitting extrinsic");

        let statuses = match self.chain.submit(extrinsic).await {
            Ok(rx) => rx,
            Err(e) => return SubmissionOutcome::TransportError(e.to_string()),
        };

        let terminal = self.await_terminal(&hash, statuses);
        match tokio::time::timeout(self.finality_timeout, terminal).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%hash, timeout = ?self.finality_timeout, "finality wait timed out");
                SubmissionOutcome::TransportError(format!(
                    "no finality for {} within {:?}",
                    hash, self.finality_timeout
                ))
            }
        }
    }

    async fn await_terminal(
        &self,
        hash: &str,
        mut statuses: mpsc::Receiver<TxStatus>,
    ) -> SubmissionOutcome {
        let mut observed = false;

        while let Some(status) = statuses.recv().await {
            info!(%hash, status = status.name(), "transaction status");
            match status {
                TxStatus::Finalized { block_hash, events } => {
                    for event in &events {
                        debug!(%hash, section = %event.section, method = %event.method, "event");
                    }
                    let failed = events.iter().any(|e| self.failure_marker.matches(e));
                    info!(%hash, %block_hash, success = !failed, "extrinsic finalized");
                    return SubmissionOutcome::Finalized { success: !failed };
                }
                TxStatus::Invalid { reason } | TxStatus::Error { reason } => {
                    return SubmissionOutcome::Rejected(reason);
                }
                TxStatus::Dropped => {
                    return SubmissionOutcome::Rejected("dropped from transaction pool".into());
                }
                TxStatus::Usurped { by } => {
                    return SubmissionOutcome::Rejected(format!("usurped by {}", by));
                }
                TxStatus::Ready
                | TxStatus::Broadcast
                | TxStatus::InBlock { .. }
                | TxStatus::Retracted { .. } => observed = true,
            }
        }

        if observed {
            SubmissionOutcome::TransportError("status stream closed before finality".into())
        } else {
            SubmissionOutcome::TransportError("status stream closed before any status".into())
        }
    }
}
