//! Error types for hardware operations.
//!
//! Every variant describes a transient device failure. Callers decide how
//! many of them to tolerate before giving up on the device.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Invalid data received from device.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Device initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Card reading error.
    #[error("Card read error: {message}")]
    CardReadError { message: String },

    /// Frame acquisition error.
    #[error("Frame capture error: {message}")]
    CaptureError { message: String },

    /// Releasing the frame source failed.
    #[error("Release failed: {message}")]
    ReleaseFailed { message: String },

    /// Classifier could not process a region.
    #[error("Classification error: {message}")]
    ClassificationError { message: String },
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a new card read error.
    pub fn card_read(message: impl Into<String>) -> Self {
        Self::CardReadError {
            message: message.into(),
        }
    }

    /// Create a new frame capture error.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::CaptureError {
            message: message.into(),
        }
    }

    /// Create a new release error.
    pub fn release_failed(message: impl Into<String>) -> Self {
        Self::ReleaseFailed {
            message: message.into(),
        }
    }

    /// Create a new classification error.
    pub fn classification(message: impl Into<String>) -> Self {
        Self::ClassificationError {
            message: message.into(),
        }
    }
}
