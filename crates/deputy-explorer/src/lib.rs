//! Upstream access for the relay: chain height, contract logs and ABI,
//! all read from a block-explorer style REST API.

pub mod explorer_client;

use async_trait::async_trait;
use deputy_crypto::{AbiDescriptor, EventTable};
use deputy_types::{LogBatch, Result, Window};
use tracing::info;

pub use explorer_client::ExplorerClient;

/// Reports the upstream chain's current height.
///
/// One network call per invocation; retries are the caller's business.
#[async_trait]
pub trait HeightOracle: Send + Sync {
    async fn current_height(&self) -> Result<u64>;
}

/// Reads contract logs and ABI from the upstream source.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Logs emitted by `contract_address` in the inclusive `window`.
    ///
    /// An empty batch means "no events", never "fetch failed".
    async fn fetch_logs(&self, contract_address: &str, window: Window) -> Result<LogBatch>;

    async fn fetch_abi(&self, contract_address: &str) -> Result<AbiDescriptor>;
}

/// Fetch the contract ABI and build its `topic0 → event` table.
pub async fn load_event_table(
    fetcher: &dyn LogFetcher,
    contract_address: &str,
) -> Result<EventTable> {
    let abi = fetcher.fetch_abi(contract_address).await?;
    let table = EventTable::from_abi(&abi);
    info!(contract = contract_address, events = table.len(), "event table built");
    Ok(table)
}
