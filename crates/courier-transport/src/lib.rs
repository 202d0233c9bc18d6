//! Control surface for the courier bot.
//!
//! Provides:
//! - JSON wire types for the control API
//! - Axum router exposing status, pairing code, logs, reset and send (feature: http)

pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

pub use protocol::{HealthResponse, LogsResponse, QrResponse, ResetResponse, SendRequest, SendResponse};
