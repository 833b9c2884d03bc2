//! Peripheral abstraction layer for the attendance kiosk.
//!
//! The kiosk drives three external collaborators, each behind a trait:
//!
//! - [`CardReaderDriver`]: bounded polling of a card reader, plus reset.
//! - [`FrameSource`]: a camera that is opened, read, and released.
//! - [`Classifier`]: cheap face detection and expensive identification.
//!
//! All fallible operations return [`Result<T>`] with a [`HardwareError`].
//! The [`mock`] module provides scriptable implementations used by tests and
//! by the simulator.
//!
//! ```no_run
//! use rollcall_hardware::traits::{Classifier, FrameSource};
//! use rollcall_hardware::{BoundingBox, Result};
//!
//! async fn biggest_face<S: FrameSource, C: Classifier>(
//!     source: &S,
//!     classifier: &C,
//! ) -> Result<Option<BoundingBox>> {
//!     let frame = source.acquire().await?;
//!     Ok(BoundingBox::largest(&classifier.detect(&frame)))
//! }
//! ```
//!
//! [`CardReaderDriver`]: traits::CardReaderDriver
//! [`FrameSource`]: traits::FrameSource
//! [`Classifier`]: traits::Classifier

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::{HardwareError, Result};
pub use traits::{CardReaderDriver, Classifier, FrameSource};
pub use types::{BoundingBox, CardData, Classification, Frame, MAX_UID_LENGTH};
