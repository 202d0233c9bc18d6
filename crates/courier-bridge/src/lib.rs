//! Protocol client backed by a bridge sidecar process.
//!
//! Provides:
//! - Bridge wire protocol types (line-delimited JSON)
//! - Command building utilities
//! - `BridgeClient` / `BridgeFactory` implementing the core client traits

pub mod client;
pub mod command;
pub mod protocol;

pub use client::{BridgeClient, BridgeFactory};
pub use command::{CommandBuilder, CommandParts};
pub use protocol::{BridgeCommand, BridgeMessage, ProtocolPeer};
