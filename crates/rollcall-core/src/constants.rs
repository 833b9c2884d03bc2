//! Core constants for the attendance kiosk.
//!
//! This module centralizes topic layout, timing defaults and thresholds used
//! across the workspace. Every timing value here is a *default*: the
//! effective values come from [`KioskConfig`](crate::config::KioskConfig),
//! which can override each of them.
//!
//! # Topic Layout
//!
//! | Purpose | Topic |
//! |---------|-------|
//! | Session control | `devices/{device_id}/control` |
//! | Submission request | `attendance/{method}/request` |
//! | Submission response | `attendance/{method}/response/{device_id}` |
//!
//! # Usage
//!
//! ```
//! use rollcall_core::constants::*;
//! use std::time::Duration;
//!
//! let timeout = Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 10);
//! assert_eq!(DISPLAY_QUEUE_DEPTH, 2);
//! ```

// ============================================================================
// Topics
// ============================================================================

/// Root segment of device control topics.
pub const CONTROL_TOPIC_ROOT: &str = "devices";

/// Trailing segment of device control topics.
pub const CONTROL_TOPIC_LEAF: &str = "control";

/// Root segment of attendance submission topics.
pub const ATTENDANCE_TOPIC_ROOT: &str = "attendance";

/// Topic level separator.
pub const TOPIC_SEPARATOR: char = '/';

/// Single-level topic wildcard.
pub const WILDCARD_SINGLE: &str = "+";

/// Multi-level topic wildcard (must be the last level of a filter).
pub const WILDCARD_MULTI: &str = "#";

// ============================================================================
// Identity
// ============================================================================

/// Device identifier used when no configuration overrides it.
pub const DEFAULT_DEVICE_ID: &str = "4";

/// Control filter that listens to every device's control topic.
pub const DEFAULT_CONTROL_FILTER: &str = WILDCARD_SINGLE;

/// Maximum accepted length for a subject identifier.
pub const MAX_SUBJECT_ID_LENGTH: usize = 64;

/// Maximum accepted length for a device identifier.
pub const MAX_DEVICE_ID_LENGTH: usize = 32;

// ============================================================================
// Capture pipeline
// ============================================================================

/// Capacity of the display queue handed to the UI.
///
/// Fixed: the producer never blocks, so frames beyond this depth are dropped.
pub const DISPLAY_QUEUE_DEPTH: usize = 2;

/// Minimum interval between two classifications (milliseconds).
pub const DEFAULT_CLASSIFY_INTERVAL_MS: u64 = 2_000;

/// Window during which the same identity is not re-submitted (milliseconds).
pub const DEFAULT_SUBMISSION_COOLDOWN_MS: u64 = 5_000;

/// Classifier distance below which a result counts as a recognized identity.
///
/// Confidence values are distances: lower means a closer match.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 70.0;

/// Upper bound for a single frame acquisition (milliseconds).
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 500;

/// Consecutive acquisition failures tolerated before the pipeline disarms.
pub const DEFAULT_MAX_CAPTURE_ERRORS: u32 = 5;

/// Delay between opening the camera and showing frames (milliseconds).
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_500;

/// Attempts made to open the frame source before giving up.
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 3;

/// Delay between two open attempts (milliseconds).
pub const DEFAULT_OPEN_RETRY_DELAY_MS: u64 = 2_000;

/// Bound on joining a stopping worker (milliseconds).
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// Card reader
// ============================================================================

/// Upper bound for one hardware poll (milliseconds).
pub const DEFAULT_CARD_POLL_TIMEOUT_MS: u64 = 500;

/// Consecutive reader errors that trigger a reinitialization.
pub const DEFAULT_MAX_READER_ERRORS: u32 = 3;

// ============================================================================
// Submission gateway
// ============================================================================

/// Time to wait for a correlated response (milliseconds).
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10_000;

/// Marking source reported for card based check-ins.
pub const MARKED_BY_RFID: &str = "rfid";

/// Marking source reported for camera based check-outs.
pub const MARKED_BY_FACE: &str = "face_recognition";

// ============================================================================
// Environment
// ============================================================================

/// Prefix of environment variables that override configuration values.
pub const ENV_PREFIX: &str = "ROLLCALL_";
