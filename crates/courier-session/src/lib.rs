//! Connection lifecycle orchestration for courier.
//!
//! Provides:
//! - `LifecycleManager` - Startup, reset and restart supervision
//! - `PairingFlow` - Pairing codes to displayable artifacts
//! - `EventDispatcher` - Client events to session state and replies
//! - `QrPngRenderer` - Default pairing code renderer
//! - Storage implementations (memory, SQLite)

pub mod dispatcher;
pub mod manager;
pub mod pairing;
pub mod render;
pub mod storage;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use dispatcher::EventDispatcher;
pub use manager::{LifecycleManager, ManagerBuilder, SendError, StartupError};
pub use pairing::PairingFlow;
pub use render::QrPngRenderer;
