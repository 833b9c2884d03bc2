//! Data produced by the kiosk peripherals.

use crate::error::{HardwareError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum UID length in bytes (per ISO 14443 specification).
pub const MAX_UID_LENGTH: usize = 10;

/// Card read by the card reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardData {
    /// Card unique identifier (1-10 bytes).
    pub uid: Vec<u8>,

    /// Timestamp when the card was read.
    pub timestamp: DateTime<Utc>,
}

impl CardData {
    /// Create new card data with the current timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the UID is empty or longer than
    /// [`MAX_UID_LENGTH`] bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use rollcall_hardware::CardData;
    ///
    /// let card = CardData::new(vec![12, 34, 56]).unwrap();
    /// assert_eq!(card.uid_dashed(), "12-34-56");
    /// ```
    pub fn new(uid: Vec<u8>) -> Result<Self> {
        if uid.is_empty() || uid.len() > MAX_UID_LENGTH {
            return Err(HardwareError::invalid_data(format!(
                "UID must be 1-{} bytes, got {}",
                MAX_UID_LENGTH,
                uid.len()
            )));
        }
        Ok(Self {
            uid,
            timestamp: Utc::now(),
        })
    }

    /// Get the UID as dash-separated decimal bytes (`12-34-56`).
    ///
    /// This is the form submitted as the card's subject identifier.
    pub fn uid_dashed(&self) -> String {
        self.uid
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Rectangular region of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Return the largest region of a detection result, if any.
    pub fn largest(regions: &[BoundingBox]) -> Option<BoundingBox> {
        regions.iter().copied().max_by_key(BoundingBox::area)
    }
}

/// Grayscale frame captured by a frame source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,

    /// Row-major pixels, one byte each.
    pub pixels: Vec<u8>,

    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,

    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Create a frame from raw pixels.
    ///
    /// # Errors
    ///
    /// Returns an error if `pixels.len()` does not equal `width * height`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(HardwareError::invalid_data(format!(
                "frame {}x{} needs {} pixels, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            sequence,
            captured_at: Utc::now(),
        })
    }

    /// Create a frame filled with a single gray level.
    pub fn filled(width: u32, height: u32, level: u8, sequence: u64) -> Self {
        Self {
            width,
            height,
            pixels: vec![level; width as usize * height as usize],
            sequence,
            captured_at: Utc::now(),
        }
    }

    /// Pixel value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Set the pixel at `(x, y)`. Writes outside the frame are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, level: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = y as usize * self.width as usize + x as usize;
        if let Some(p) = self.pixels.get_mut(index) {
            *p = level;
        }
    }
}

/// Result of classifying one detected region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Classification {
    /// The classifier matched a known label.
    ///
    /// `confidence` is a distance: lower means a closer match.
    Recognized { identity: String, confidence: f32 },

    /// No known label matched.
    Unknown,
}

impl Classification {
    pub fn recognized(identity: impl Into<String>, confidence: f32) -> Self {
        Self::Recognized {
            identity: identity.into(),
            confidence,
        }
    }
}
