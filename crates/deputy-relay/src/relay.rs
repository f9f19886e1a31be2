//! Per-stream relay loop.
//!
//! Each cycle walks `ComputeWindow → Fetching → Submitting → Advancing` and
//! then sleeps. The checkpoint moves only after the downstream chain has
//! finalized the window's relay call successfully; every other path leaves
//! it untouched so the same window is retried on the next cycle.

use std::fmt;
use std::sync::Arc;

use deputy_crypto::{EventTable, RelayKeyPair};
use deputy_explorer::{HeightOracle, LogFetcher};
use deputy_store::CheckpointStore;
use deputy_tx::{ChainClient, NonceTracker, RelayPayload, SubmissionPipeline};
use deputy_types::{LogBatch, SubmissionOutcome, Window};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PayloadMode, StreamConfig};
use crate::window::{is_confirmed, seed_window};

/// Stage of a relay cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    ComputeWindow,
    Fetching,
    Submitting,
    Advancing,
    Sleeping,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::ComputeWindow => "compute_window",
            RelayState::Fetching => "fetching",
            RelayState::Submitting => "submitting",
            RelayState::Advancing => "advancing",
            RelayState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cancellation was observed before the next stage started.
    Cancelled,
    /// The checkpoint could not be read or seeded.
    StorageUnavailable(String),
    /// The upstream tip height could not be read.
    HeightUnavailable(String),
    /// The pending window is still within `confirmation_depth` of the tip.
    AwaitingConfirmations { latest: u64 },
    /// The upstream log query failed; nothing was submitted.
    FetchFailed(String),
    /// The submission did not finalize successfully.
    NotConfirmed(SubmissionOutcome),
    /// Finalized, but the checkpoint compare-and-set failed.
    AdvanceFailed(String),
    /// Finalized and the checkpoint moved to `next`.
    Advanced { next: Window, events: usize },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Cancelled => "cancelled",
            CycleOutcome::StorageUnavailable(_) => "storage_unavailable",
            CycleOutcome::HeightUnavailable(_) => "height_unavailable",
            CycleOutcome::AwaitingConfirmations { .. } => "awaiting_confirmations",
            CycleOutcome::FetchFailed(_) => "fetch_failed",
            CycleOutcome::NotConfirmed(outcome) => outcome.label(),
            CycleOutcome::AdvanceFailed(_) => "advance_failed",
            CycleOutcome::Advanced { .. } => "advanced",
        }
    }
}

/// Result of one `run_cycle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub stream_id: String,
    /// Last stage entered before the cycle stopped.
    pub ended_in: RelayState,
    /// Window the cycle worked on, once known.
    pub window: Option<Window>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn advanced(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Advanced { .. })
    }
}

/// Clients shared by every loop of a process. Signing accounts are not
/// shared: each loop gets its own.
#[derive(Clone)]
pub struct RelayContext {
    pub store: Arc<dyn CheckpointStore>,
    pub heights: Arc<dyn HeightOracle>,
    pub logs: Arc<dyn LogFetcher>,
    pub chain: Arc<dyn ChainClient>,
}

/// Relays one stream's windows, one cycle at a time.
pub struct RelayLoop {
    config: StreamConfig,
    store: Arc<dyn CheckpointStore>,
    heights: Arc<dyn HeightOracle>,
    logs: Arc<dyn LogFetcher>,
    nonces: NonceTracker,
    pipeline: SubmissionPipeline,
    signer: RelayKeyPair,
    events: Arc<EventTable>,
    cancel: CancellationToken,
}

impl RelayLoop {
    pub fn new(
        config: StreamConfig,
        ctx: RelayContext,
        signer: RelayKeyPair,
        events: EventTable,
        cancel: CancellationToken,
    ) -> Self {
        let pipeline = SubmissionPipeline::new(ctx.chain.clone())
            .with_failure_marker(config.failure_marker.clone())
            .with_finality_timeout(config.finality_timeout());
        Self {
            config,
            store: ctx.store,
            heights: ctx.heights,
            logs: ctx.logs,
            nonces: NonceTracker::new(ctx.chain),
            pipeline,
            signer,
            events: Arc::new(events),
            cancel,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.config.stream_id
    }

    /// Run cycles until cancelled, sleeping `poll_interval` between them.
    pub async fn run(&self) {
        info!(
            stream_id = %self.config.stream_id,
            contract = %self.config.contract_address,
            window_size = self.config.window_size,
            confirmation_depth = self.config.confirmation_depth,
            signer = %self.signer.address(),
            "relay loop started"
        );

        loop {
            let report = self.run_cycle().await;
            if report.outcome == CycleOutcome::Cancelled {
                break;
            }
            debug!(
                stream_id = %self.config.stream_id,
                state = %RelayState::Sleeping,
                after = %report.ended_in,
                interval = ?self.config.poll_interval(),
                "cycle done"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!(stream_id = %self.config.stream_id, "relay loop stopped");
    }

    /// Run a single cycle and report where it ended.
    ///
    /// Cancellation is honoured before each stage up to submission. Once a
    /// relay call is submitted the cycle always runs through `Advancing`.
    pub async fn run_cycle(&self) -> CycleReport {
        if self.cancel.is_cancelled() {
            return self.report(RelayState::ComputeWindow, None, CycleOutcome::Cancelled);
        }

        // ComputeWindow
        let latest = match self.heights.current_height().await {
            Ok(latest) => latest,
            Err(e) => {
                let outcome = CycleOutcome::HeightUnavailable(e.to_string());
                return self.report(RelayState::ComputeWindow, None, outcome);
            }
        };
        let window = match self.current_window(latest).await {
            Ok(window) => window,
            Err(e) => {
                let outcome = CycleOutcome::StorageUnavailable(e.to_string());
                return self.report(RelayState::ComputeWindow, None, outcome);
            }
        };
        if !is_confirmed(&window, latest, self.config.confirmation_depth) {
            return self.report(
                RelayState::ComputeWindow,
                Some(window),
                CycleOutcome::AwaitingConfirmations { latest },
            );
        }

        if self.cancel.is_cancelled() {
            return self.report(RelayState::Fetching, Some(window), CycleOutcome::Cancelled);
        }

        // Fetching
        let batch = match self.logs.fetch_logs(&self.config.contract_address, window).await {
            Ok(batch) => batch,
            Err(e) => {
                let outcome = CycleOutcome::FetchFailed(e.to_string());
                return self.report(RelayState::Fetching, Some(window), outcome);
            }
        };
        self.log_batch(&batch);

        if self.cancel.is_cancelled() {
            return self.report(RelayState::Submitting, Some(window), CycleOutcome::Cancelled);
        }

        // Submitting
        let outcome = self.submit(window, &batch).await;
        if !outcome.is_success() {
            let outcome = CycleOutcome::NotConfirmed(outcome);
            return self.report(RelayState::Submitting, Some(window), outcome);
        }

        // Advancing
        let next = window.following(self.config.window_size);
        let outcome = match self.store.advance(&self.config.stream_id, window, next).await {
            Ok(_) => CycleOutcome::Advanced { next, events: batch.len() },
            Err(e) => CycleOutcome::AdvanceFailed(e.to_string()),
        };
        self.report(RelayState::Advancing, Some(window), outcome)
    }

    /// Stored window, seeding it from the tip when the stream is new.
    async fn current_window(&self, latest: u64) -> deputy_types::Result<Window> {
        if let Some(checkpoint) = self.store.load(&self.config.stream_id).await? {
            return Ok(checkpoint.window());
        }
        let seed = seed_window(
            latest,
            self.config.window_size,
            self.config.confirmation_depth,
            self.config.start_block,
        );
        let checkpoint = self.store.create_or_get(&self.config.stream_id, seed).await?;
        info!(
            stream_id = %self.config.stream_id,
            window = %checkpoint.window(),
            latest,
            "checkpoint seeded"
        );
        Ok(checkpoint.window())
    }

    fn payload(&self, window: Window, batch: &LogBatch) -> RelayPayload {
        match &self.config.payload {
            PayloadMode::FetchInstruction { source_name, rpc_url } => {
                let contract = &self.config.contract_address;
                RelayPayload::fetch_instruction(source_name, rpc_url, contract, window)
            }
            PayloadMode::EventSummary => RelayPayload::event_summary(batch, &self.events),
        }
    }

    async fn submit(&self, window: Window, batch: &LogBatch) -> SubmissionOutcome {
        let address = self.signer.address();
        let nonce = match self.nonces.current_nonce(&address).await {
            Ok(nonce) => nonce,
            Err(e) => {
                return SubmissionOutcome::TransportError(format!("nonce query failed: {}", e));
            }
        };
        let call = match self.payload(window, batch).into_call() {
            Ok(call) => call,
            Err(e) => return SubmissionOutcome::TransportError(e.to_string()),
        };
        debug!(
            stream_id = %self.config.stream_id,
            from = window.from_block,
            to = window.to_block,
            nonce,
            method = %call.method,
            "submitting window"
        );
        self.pipeline.submit(&self.signer, nonce, call).await
    }

    fn log_batch(&self, batch: &LogBatch) {
        debug!(
            stream_id = %self.config.stream_id,
            from = batch.window.from_block,
            to = batch.window.to_block,
            count = batch.len(),
            "fetched logs"
        );
        for log in &batch.logs {
            let name = log
                .topic0()
                .and_then(|t| self.events.event_name(t))
                .unwrap_or("unknown");
            debug!(
                stream_id = %self.config.stream_id,
                block = log.block_number,
                event = name,
                "log"
            );
        }
    }

    fn report(
        &self,
        ended_in: RelayState,
        window: Option<Window>,
        outcome: CycleOutcome,
    ) -> CycleReport {
        let stream_id = self.config.stream_id.as_str();
        let from = window.map(|w| w.from_block);
        let to = window.map(|w| w.to_block);
        let label = outcome.label();

        match &outcome {
            CycleOutcome::Advanced { next, events } => {
                info!(
                    stream_id,
                    ?from,
                    ?to,
                    next = %next,
                    events,
                    outcome = label,
                    "window relayed"
                );
            }
            CycleOutcome::AwaitingConfirmations { latest } => {
                debug!(stream_id, ?from, ?to, latest, outcome = label, "window not yet confirmed");
            }
            CycleOutcome::Cancelled => {
                debug!(stream_id, state = %ended_in, outcome = label, "cycle cancelled");
            }
            CycleOutcome::NotConfirmed(result) => {
                warn!(
                    stream_id,
                    ?from,
                    ?to,
                    state = %ended_in,
                    outcome = label,
                    detail = %result,
                    "window not confirmed"
                );
            }
            CycleOutcome::StorageUnavailable(reason)
            | CycleOutcome::HeightUnavailable(reason)
            | CycleOutcome::FetchFailed(reason)
            | CycleOutcome::AdvanceFailed(reason) => {
                warn!(
                    stream_id,
                    ?from,
                    ?to,
                    state = %ended_in,
                    outcome = label,
                    error = %reason,
                    "cycle failed"
                );
            }
        }

        CycleReport { stream_id: stream_id.to_string(), ended_in, window, outcome }
    }
}
