//! Core abstractions for the courier bot connection lifecycle.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionState` - Shared connection status + pairing artifact
//! - `LogBuffer` - Bounded newest-first log history with live subscribers
//! - `ClientEvent` / `PairingEvent` - Closed event unions from the protocol client
//! - `AutoResponder` - Pluggable reply policy
//! - Protocol client, store and renderer traits

pub mod config;
pub mod event;
pub mod log_buffer;
pub mod responder;
pub mod session;
pub mod traits;

pub use config::{BotConfig, ConfigError};
pub use event::{ClientEvent, InboundMessage, MessageContent, PairingEvent};
pub use log_buffer::{LogBuffer, LogEntry};
pub use responder::{AutoResponder, EchoResponder, SilentResponder};
pub use session::{ConnectionStatus, SessionSnapshot, SessionState, TransitionError};
pub use traits::{
    ClientError, ClientFactory, ClientHandle, CodeRenderer, Identity, ProtocolClient, RenderError,
    SessionStore, StoreError,
};
