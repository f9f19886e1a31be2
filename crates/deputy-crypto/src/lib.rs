//! Hashing and key handling for the relay.
//!
//! - `abi`: event-signature hashing and the `topic0 → event` table
//! - `keys`: key-file loading and relay transaction signing

pub mod abi;
pub mod keys;

pub use abi::{AbiDescriptor, EventDescriptor, EventTable};
pub use keys::RelayKeyPair;
