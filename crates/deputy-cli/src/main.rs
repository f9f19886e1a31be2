mod cli;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use deputy_explorer::{load_event_table, ExplorerClient};
use deputy_relay::{RelayConfig, RelayContext, RelayLoop, RelayService, StreamConfig};
use deputy_store::{CheckpointStore, FileStore};
use deputy_tx::HttpChainClient;
use deputy_types::Checkpoint;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = RelayConfig::from_file(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match &cli.command {
        Command::Run => run(config).await,
        Command::Status => status(config).await,
        Command::Events { stream } => events(config, stream).await,
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.command {
        Command::Run => tracing_subscriber::fmt().with_env_filter(filter).init(),
        // stdout carries the command output
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn explorer_client(config: &RelayConfig) -> ExplorerClient {
    ExplorerClient::new(
        &config.explorer.base_url,
        config.explorer.api_key.as_deref(),
        config.explorer.request_timeout_ms,
    )
}

async fn run(config: RelayConfig) -> Result<()> {
    let signers = config.load_signers().context("loading stream signing accounts")?;

    let store = Arc::new(FileStore::new(&config.store_dir));
    store
        .init()
        .await
        .with_context(|| format!("opening checkpoint store {}", config.store_dir.display()))?;

    let explorer = Arc::new(explorer_client(&config));
    let chain = Arc::new(HttpChainClient::new(
        &config.chain.base_url,
        config.chain.request_timeout_ms,
        config.chain.status_poll_ms,
    ));
    let ctx = RelayContext {
        store,
        heights: explorer.clone(),
        logs: explorer.clone(),
        chain,
    };

    let mut service = RelayService::new(CancellationToken::new());
    for (stream, signer) in config.streams.iter().zip(signers) {
        let table = load_event_table(explorer.as_ref(), &stream.contract_address)
            .await
            .with_context(|| format!("loading ABI for stream {}", stream.stream_id))?;
        tracing::info!(
            stream_id = %stream.stream_id,
            address = %signer.address(),
            events = table.len(),
            "stream ready"
        );
        let cancel = service.child_token();
        let relay = RelayLoop::new(stream.clone(), ctx.clone(), signer, table, cancel);
        service.add(relay);
    }

    let running = service.start();
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("ctrl-c received, stopping relay loops");
    running.shutdown().await;
    Ok(())
}

async fn status(config: RelayConfig) -> Result<()> {
    let store = FileStore::new(&config.store_dir);
    let checkpoints = store
        .list()
        .await
        .with_context(|| format!("reading checkpoints in {}", config.store_dir.display()))?;
    let rows = status_rows(&config.streams, checkpoints);
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

/// One row per configured stream (`checkpoint: null` until seeded), then
/// stored checkpoints of streams no longer configured.
fn status_rows(streams: &[StreamConfig], checkpoints: Vec<Checkpoint>) -> Vec<serde_json::Value> {
    let mut stored: BTreeMap<_, _> = checkpoints
        .into_iter()
        .map(|cp| (cp.stream_id.clone(), cp))
        .collect();

    let mut rows: Vec<_> = streams
        .iter()
        .map(|stream| {
            serde_json::json!({
                "streamId": stream.stream_id,
                "contractAddress": stream.contract_address,
                "checkpoint": stored.remove(&stream.stream_id),
            })
        })
        .collect();
    rows.extend(stored.into_iter().map(|(stream_id, checkpoint)| {
        serde_json::json!({
            "streamId": stream_id,
            "contractAddress": null,
            "checkpoint": checkpoint,
        })
    }));
    rows
}

async fn events(config: RelayConfig, stream_id: &str) -> Result<()> {
    let stream = config
        .stream(stream_id)
        .ok_or_else(|| anyhow!("no stream {} in config", stream_id))?;
    let explorer = explorer_client(&config);
    let table = load_event_table(&explorer, &stream.contract_address)
        .await
        .with_context(|| format!("loading ABI of {}", stream.contract_address))?;

    for event in table.descriptors() {
        println!("{}  {}", event.topic0, event.signature);
    }
    Ok(())
}
