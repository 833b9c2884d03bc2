//! Bounded display queue between the capture worker and the UI.
//!
//! The queue holds at most [`DISPLAY_QUEUE_DEPTH`] frames. The producer never
//! waits: a frame offered to a full queue is dropped and counted.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use rollcall_core::constants::DISPLAY_QUEUE_DEPTH;
use rollcall_hardware::{BoundingBox, Frame};
use tokio::sync::mpsc;
use tracing::trace;

/// Gray level used to draw region outlines.
const OUTLINE_LEVEL: u8 = u8::MAX;

/// A frame ready to be shown.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    /// Pixels with the detected region outlined.
    pub frame: Frame,

    /// Region that was outlined, if a face was detected.
    pub region: Option<BoundingBox>,

    /// Text of the last recognition or submission result.
    pub caption: String,
}

impl DisplayFrame {
    /// Outline `region` on `frame` and attach `caption`.
    ///
    /// Parts of the region outside the frame are clipped.
    pub fn annotate(mut frame: Frame, region: Option<BoundingBox>, caption: impl Into<String>) -> Self {
        if let Some(b) = region {
            let right = b.x.saturating_add(b.width.saturating_sub(1));
            let bottom = b.y.saturating_add(b.height.saturating_sub(1));
            for x in b.x..=right.min(frame.width.saturating_sub(1)) {
                frame.set_pixel(x, b.y, OUTLINE_LEVEL);
                frame.set_pixel(x, bottom, OUTLINE_LEVEL);
            }
            for y in b.y..=bottom.min(frame.height.saturating_sub(1)) {
                frame.set_pixel(b.x, y, OUTLINE_LEVEL);
                frame.set_pixel(right, y, OUTLINE_LEVEL);
            }
        }
        Self {
            frame,
            region,
            caption: caption.into(),
        }
    }
}

/// Create a connected producer/consumer pair.
pub fn display_queue() -> (DisplayQueue, DisplayFrames) {
    let (tx, rx) = mpsc::channel(DISPLAY_QUEUE_DEPTH);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        DisplayQueue {
            tx,
            dropped: Arc::clone(&dropped),
        },
        DisplayFrames { rx, dropped },
    )
}

/// Producer side of the display queue.
#[derive(Debug, Clone)]
pub struct DisplayQueue {
    tx: mpsc::Sender<DisplayFrame>,
    dropped: Arc<AtomicU64>,
}

impl DisplayQueue {
    /// Offer a frame without waiting.
    ///
    /// Returns `false` if the frame was dropped because the queue is full or
    /// the consumer is gone.
    pub fn offer(&self, frame: DisplayFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(sequence = frame.frame.sequence, dropped, "display queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the display queue.
#[derive(Debug)]
pub struct DisplayFrames {
    rx: mpsc::Receiver<DisplayFrame>,
    dropped: Arc<AtomicU64>,
}

impl DisplayFrames {
    pub async fn recv(&mut self) -> Option<DisplayFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DisplayFrame> {
        self.rx.try_recv().ok()
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Stream for DisplayFrames {
    type Item = DisplayFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
