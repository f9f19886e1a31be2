use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "deputy",
    version,
    about = "Relays contract event windows to the downstream chain"
)]
pub struct Cli {
    /// Relay configuration file
    #[arg(long, short, env = "DEPUTY_CONFIG", default_value = "deputy.json", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every configured stream until ctrl-c
    Run,
    /// Print the stored checkpoint of each stream
    Status,
    /// Print the topic0 -> event table of a stream's contract
    Events {
        #[arg(long)]
        stream: String,
    },
}
