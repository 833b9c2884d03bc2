//! Publish/subscribe transport for the attendance kiosk.
//!
//! This crate defines the [`PubSubChannel`] contract the kiosk talks to, an
//! in-process [`LocalBroker`] implementing it, MQTT-style topic filter
//! matching, and request/response correlation with a timeout.
//!
//! # Example
//!
//! ```
//! use rollcall_transport::{LocalBroker, PubSubChannel, correlation};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> rollcall_transport::Result<()> {
//!     let broker = LocalBroker::new();
//!
//!     // Nobody answers, so the request times out.
//!     let outcome = correlation::request(
//!         &broker,
//!         "attendance/check-in/request",
//!         "{}".into(),
//!         "attendance/check-in/response/4",
//!         Duration::from_millis(10),
//!     )
//!     .await;
//!     assert!(outcome.unwrap_err().is_timeout());
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod channel;
pub mod correlation;
pub mod error;
pub mod topics;

pub use broker::LocalBroker;
pub use channel::{PubSubChannel, Publication, Subscription};
pub use error::{Result, TransportError};
