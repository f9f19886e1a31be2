//! HTTP client for the downstream chain gateway.
//!
//! Endpoints:
//! - GET /api/v1/accounts/{address}/nonce
//! - POST /api/v1/extrinsics
//! - GET /api/v1/extrinsics/{hash}/status

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deputy_types::{DeputyError, Hex, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{ChainClient, SignedExtrinsic, TxStatus};

/// Status polls per extrinsic before the stream is abandoned.
pub const MAX_STATUS_POLLS: u32 = 600;

/// Gateway API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResponse<T> {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub data: T,
}

/// Chain gateway client for nonce queries and extrinsic submission.
#[derive(Clone)]
pub struct HttpChainClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    status_poll: Duration,
    max_polls: u32,
    max_poll_errors: u32,
}

impl HttpChainClient {
    pub fn new(base_url: &str, timeout_ms: Option<u64>, status_poll_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            status_poll: Duration::from_millis(status_poll_ms.unwrap_or(2_000)),
            max_polls: MAX_STATUS_POLLS,
            max_poll_errors: 3,
        }
    }

    fn poll_limits(&self) -> PollLimits {
        PollLimits {
            interval: self.status_poll,
            max_polls: self.max_polls,
            max_errors: self.max_poll_errors,
        }
    }

    /// GET /api/v1/accounts/{address}/nonce
    pub async fn get_nonce(&self, address: &str) -> Result<u64> {
        let url = format!("{}/api/v1/accounts/{}/nonce", self.base_url, address);

        let resp = self.client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DeputyError::Transport(format!("chain request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(DeputyError::Transport(format!(
                "chain gateway returned status {}",
                resp.status()
            )));
        }

        let body: ChainResponse<u64> = resp
            .json()
            .await
            .map_err(|e| DeputyError::Transport(format!("failed to parse nonce response: {}", e)))?;

        Ok(body.data)
    }

    /// Submit a signed extrinsic.
    ///
    /// POST /api/v1/extrinsics
    ///
    /// A 4xx reply is the gateway refusing the extrinsic itself and comes
    /// back as `SubmissionRejected`; everything else is a transport failure.
    pub async fn post_extrinsic(&self, extrinsic: &SignedExtrinsic) -> Result<Hex> {
        let url = format!("{}/api/v1/extrinsics", self.base_url);

        let resp = self.client
            .post(&url)
            .json(extrinsic)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DeputyError::Transport(format!("chain request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("chain gateway returned status {}: {}", status, body);
            return Err(if status.is_client_error() {
                DeputyError::SubmissionRejected(message)
            } else {
                DeputyError::Transport(message)
            });
        }

        let body: ChainResponse<Hex> = resp
            .json()
            .await
            .map_err(|e| {
                DeputyError::Transport(format!("failed to parse submit response: {}", e))
            })?;

        Ok(body.data)
    }

    /// Latest known status of an extrinsic, if the gateway has seen it.
    ///
    /// GET /api/v1/extrinsics/{hash}/status
    pub async fn get_status(&self, hash: &str) -> Result<Option<TxStatus>> {
        let url = format!("{}/api/v1/extrinsics/{}/status", self.base_url, hash);

        let resp = self.client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DeputyError::Transport(format!("chain request failed: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(DeputyError::Transport(format!(
                "chain gateway returned status {}",
                resp.status()
            )));
        }

        let body: ChainResponse<Option<TxStatus>> = resp
            .json()
            .await
            .map_err(|e| {
                DeputyError::Transport(format!("failed to parse status response: {}", e))
            })?;

        Ok(body.data)
    }
}

#[derive(Debug, Clone, Copy)]
struct PollLimits {
    interval: Duration,
    max_polls: u32,
    max_errors: u32,
}

/// Poll `fetch`, forwarding each status change until a terminal status.
///
/// Stops as soon as the receiver is gone, after `max_errors` consecutive
/// failures, or after `max_polls` polls. Dropping the sender closes the
/// stream, which the pipeline reads as a transport failure.
async fn forward_statuses<F, Fut>(
    hash: &str,
    limits: PollLimits,
    tx: mpsc::Sender<TxStatus>,
    mut fetch: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<TxStatus>>>,
{
    let mut last: Option<TxStatus> = None;
    let mut errors = 0u32;

    for _ in 0..limits.max_polls {
        if tx.is_closed() {
            debug!(%hash, "status receiver dropped");
            return;
        }
        match fetch().await {
            Ok(Some(status)) => {
                errors = 0;
                if last.as_ref() != Some(&status) {
                    let terminal = status.is_terminal();
                    last = Some(status.clone());
                    if tx.send(status).await.is_err() || terminal {
                        return;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                errors += 1;
                warn!(%hash, attempt = errors, error = %e, "status poll failed");
                if errors >= limits.max_errors {
                    return;
                }
            }
        }
        tokio::select! {
            _ = tx.closed() => {
                debug!(%hash, "status receiver dropped");
                return;
            }
            _ = tokio::time::sleep(limits.interval) => {}
        }
    }
    warn!(%hash, polls = limits.max_polls, "no terminal status, giving up");
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn account_nonce(&self, address: &str) -> Result<u64> {
        self.get_nonce(address).await
    }

    async fn submit(&self, extrinsic: SignedExtrinsic) -> Result<mpsc::Receiver<TxStatus>> {
        let (tx, rx) = mpsc::channel(16);

        let hash = match self.post_extrinsic(&extrinsic).await {
            Ok(hash) => hash,
            Err(DeputyError::SubmissionRejected(reason)) => {
                // surfaced on the status stream like any other refusal
                let _ = tx.send(TxStatus::Invalid { reason }).await;
                return Ok(rx);
            }
            Err(e) => return Err(e),
        };

        debug!(%hash, nonce = extrinsic.nonce, "extrinsic accepted by gateway");
        let client = self.clone();
        tokio::spawn(async move {
            let (client, hash_ref) = (&client, hash.as_str());
            forward_statuses(hash_ref, client.poll_limits(), tx, move || {
                client.get_status(hash_ref)
            })
            .await;
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn limits(max_polls: u32) -> PollLimits {
        PollLimits { interval: Duration::from_secs(2), max_polls, max_errors: 3 }
    }

    /// A status source that answers every poll with `answer` and counts polls.
    fn counting(
        polls: &Arc<AtomicU32>,
        answer: fn() -> Result<Option<TxStatus>>,
    ) -> impl FnMut() -> std::future::Ready<Result<Option<TxStatus>>> {
        let polls = polls.clone();
        move || {
            polls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(answer())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_when_receiver_dropped() {
        let polls = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::channel(16);
        let fetch = counting(&polls, || Ok(Some(TxStatus::InBlock { block_hash: "0x01".into() })));
        let poller = tokio::spawn(forward_statuses("0xaa", limits(MAX_STATUS_POLLS), tx, fetch));

        assert!(matches!(rx.recv().await, Some(TxStatus::InBlock { .. })));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(60), poller)
            .await
            .expect("poller kept running after the receiver was dropped")
            .unwrap();
        assert!(polls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_is_capped() {
        let polls = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::channel(16);
        let fetch = counting(&polls, || Ok(None));
        tokio::spawn(forward_statuses("0xbb", limits(5), tx, fetch));

        assert!(rx.recv().await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_after_repeated_errors() {
        let polls = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::channel(16);
        let fetch = counting(&polls, || Err(DeputyError::Transport("connection reset".into())));
        tokio::spawn(forward_statuses("0xcc", limits(MAX_STATUS_POLLS), tx, fetch));

        assert!(rx.recv().await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_ends_stream() {
        let polls = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::channel(16);
        let fetch = counting(&polls, || {
            Ok(Some(TxStatus::Finalized { block_hash: "0x02".into(), events: Vec::new() }))
        });
        tokio::spawn(forward_statuses("0xdd", limits(MAX_STATUS_POLLS), tx, fetch));

        assert!(matches!(rx.recv().await, Some(TxStatus::Finalized { .. })));
        assert!(rx.recv().await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_envelope() {
        let raw = r#"{"code":0,"message":"ok","data":{"status":"finalized","block_hash":"0xab",
            "events":[{"section":"system","method":"ExtrinsicFailed",
                "data":{"dispatchError":"BadOrigin"}}]}}"#;
        let body: ChainResponse<Option<TxStatus>> = serde_json::from_str(raw).unwrap();
        match body.data {
            Some(TxStatus::Finalized { events, .. }) => {
                assert_eq!(events[0].method, "ExtrinsicFailed");
            }
            other => panic!("unexpected status {:?}", other),
        }

        let pending: ChainResponse<Option<TxStatus>> =
            serde_json::from_str(r#"{"code":0,"message":"ok","data":null}"#).unwrap();
        assert!(pending.data.is_none());
    }

    #[test]
    fn test_nonce_envelope() {
        let body: ChainResponse<u64> = serde_json::from_str(r#"{"data":17}"#).unwrap();
        assert_eq!(body.data, 17);
    }
}
