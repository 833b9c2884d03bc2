//! Shared domain types for the Rollcall attendance kiosk.
//!
//! This crate holds the vocabulary every other crate speaks: session states,
//! control actions, submission requests and results, identifiers, topic
//! layout, configuration and the common error type.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{CaptureConfig, CardReaderConfig, DeviceConfig, GatewayConfig, KioskConfig};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
