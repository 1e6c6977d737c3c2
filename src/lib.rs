pub mod config;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod graph;
pub mod progression;
pub mod session;
pub mod state;
pub mod store;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorCode, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
