//! Device trait definitions.
//!
//! These traits are the contract between the session layer and the kiosk
//! peripherals. Implementations write plain `async fn` bodies; the trait
//! declarations spell the futures out as `impl Future + Send` so that the
//! workers driving them can be spawned on a multi-threaded runtime.
//!
//! Call sites are generic over these traits rather than using trait objects.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::types::{BoundingBox, CardData, Classification, Frame};

/// Card reader driver.
///
/// The reader is owned by a single worker at a time, hence `&mut self`.
///
/// # Examples
///
/// ```no_run
/// use rollcall_hardware::traits::CardReaderDriver;
/// use rollcall_hardware::Result;
/// use std::time::Duration;
///
/// async fn next_uid<R: CardReaderDriver>(reader: &mut R) -> Result<String> {
///     loop {
///         if let Some(card) = reader.poll_once(Duration::from_millis(500)).await? {
///             return Ok(card.uid_dashed());
///         }
///     }
/// }
/// ```
pub trait CardReaderDriver: Send + 'static {
    /// Wait at most `timeout` for a card.
    ///
    /// Returns `Ok(None)` when no card was presented within the timeout.
    fn poll_once(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<CardData>>> + Send;

    /// Reset the reader after a streak of errors.
    fn reinitialize(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Camera or other source of frames.
///
/// Shared between the capture worker and the code that stops it, so every
/// method takes `&self`. `release` may be called while an `acquire` is
/// still pending on another task.
pub trait FrameSource: Send + Sync + 'static {
    /// Open the underlying device.
    fn open(&self) -> impl Future<Output = Result<()>> + Send;

    /// Acquire the next frame. Callers bound this with their own timeout.
    fn acquire(&self) -> impl Future<Output = Result<Frame>> + Send;

    /// Release the underlying device.
    fn release(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Face detector and classifier.
pub trait Classifier: Send + Sync + 'static {
    /// Cheap detection, run on every frame.
    fn detect(&self, frame: &Frame) -> Vec<BoundingBox>;

    /// Expensive classification of one region.
    ///
    /// Implementations that block must move the work off the async runtime
    /// themselves.
    fn classify(
        &self,
        frame: &Frame,
        region: &BoundingBox,
    ) -> impl Future<Output = Result<Classification>> + Send;
}
