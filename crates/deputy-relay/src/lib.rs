//! Checkpointed window relay.
//!
//! Scans a contract's logs on the upstream chain in fixed windows, relays
//! each window to the downstream chain and advances a persisted checkpoint
//! once the relay call is finalized.

pub mod config;
pub mod relay;
pub mod service;
pub mod window;

pub use config::{ChainConfig, ExplorerConfig, PayloadMode, RelayConfig, StreamConfig};
pub use relay::{CycleOutcome, CycleReport, RelayContext, RelayLoop, RelayState};
pub use service::{RelayService, RunningService};
pub use window::{is_confirmed, seed_window};
