//! Mock camera for testing and development.
//!
//! Produces synthetic grayscale frames at a fixed rate. The handle can make
//! `open` or `release` fail, inject acquisition faults, or stall acquisition
//! indefinitely to exercise the timeout paths of the capture pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

use crate::{Frame, HardwareError, Result, traits::FrameSource};

/// Default synthetic frame width.
pub const MOCK_FRAME_WIDTH: u32 = 64;

/// Default synthetic frame height.
pub const MOCK_FRAME_HEIGHT: u32 = 48;

/// Default time between two frames (about 30 fps).
pub const MOCK_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Default)]
struct CameraState {
    open: bool,
    open_attempts: u32,
    open_failures: u32,
    acquisitions: u64,
    faults: VecDeque<String>,
    sequence: u64,
    releases: u32,
    release_attempts: u32,
    release_failures: u32,
}

/// Mock frame source.
///
/// # Examples
///
/// ```
/// use rollcall_hardware::mock::MockCamera;
/// use rollcall_hardware::traits::FrameSource;
///
/// #[tokio::main]
/// async fn main() -> rollcall_hardware::Result<()> {
///     let (camera, handle) = MockCamera::new();
///     camera.open().await?;
///     let frame = camera.acquire().await?;
///     assert_eq!(frame.sequence, 1);
///     camera.release().await?;
///     assert!(!handle.is_open());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockCamera {
    state: Arc<Mutex<CameraState>>,
    stalled: watch::Receiver<bool>,
    width: u32,
    height: u32,
    frame_interval: Duration,
}

impl MockCamera {
    /// Create a camera with the default format.
    pub fn new() -> (Self, MockCameraHandle) {
        Self::with_format(MOCK_FRAME_WIDTH, MOCK_FRAME_HEIGHT, MOCK_FRAME_INTERVAL)
    }

    /// Create a camera with a custom frame size and rate.
    pub fn with_format(
        width: u32,
        height: u32,
        frame_interval: Duration,
    ) -> (Self, MockCameraHandle) {
        let state = Arc::new(Mutex::new(CameraState::default()));
        let (stall_tx, stalled) = watch::channel(false);

        let camera = Self {
            state: Arc::clone(&state),
            stalled,
            width,
            height,
            frame_interval,
        };
        let handle = MockCameraHandle {
            state,
            stall_tx: Arc::new(stall_tx),
        };

        (camera, handle)
    }

    fn state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for MockCamera {
    async fn open(&self) -> Result<()> {
        let mut state = self.state();
        state.open_attempts += 1;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(HardwareError::initialization_failed(
                "mock camera unavailable",
            ));
        }
        state.open = true;
        Ok(())
    }

    async fn acquire(&self) -> Result<Frame> {
        {
            let mut state = self.state();
            if !state.open {
                return Err(HardwareError::disconnected("mock camera"));
            }
            state.acquisitions += 1;
            if let Some(fault) = state.faults.pop_front() {
                return Err(HardwareError::capture(fault));
            }
        }

        let mut stalled = self.stalled.clone();
        if stalled.wait_for(|s| !*s).await.is_err() {
            return Err(HardwareError::disconnected("mock camera"));
        }
        tokio::time::sleep(self.frame_interval).await;

        let mut state = self.state();
        if !state.open {
            return Err(HardwareError::disconnected("mock camera"));
        }
        state.sequence += 1;
        let sequence = state.sequence;
        trace!(sequence, "mock camera frame");
        Ok(Frame::filled(
            self.width,
            self.height,
            (sequence % 256) as u8,
            sequence,
        ))
    }

    async fn release(&self) -> Result<()> {
        let mut state = self.state();
        state.release_attempts += 1;
        if state.release_failures > 0 {
            state.release_failures -= 1;
            return Err(HardwareError::release_failed("mock camera busy"));
        }
        state.open = false;
        state.releases += 1;
        Ok(())
    }
}

/// Handle for scripting a [`MockCamera`].
#[derive(Debug, Clone)]
pub struct MockCameraHandle {
    state: Arc<Mutex<CameraState>>,
    stall_tx: Arc<watch::Sender<bool>>,
}

impl MockCameraHandle {
    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().open_failures = count;
    }

    /// Make the next `count` calls to `release` fail.
    pub fn fail_next_releases(&self, count: u32) {
        self.state().release_failures = count;
    }

    /// Make the next acquisition fail.
    pub fn inject_fault(&self, message: impl Into<String>) {
        self.state().faults.push_back(message.into());
    }

    /// Make acquisitions hang until stalling is turned off again.
    pub fn set_stalled(&self, stalled: bool) {
        self.stall_tx.send_replace(stalled);
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn open_attempts(&self) -> u32 {
        self.state().open_attempts
    }

    /// Number of acquisitions started, including failed and stalled ones.
    pub fn acquisition_count(&self) -> u64 {
        self.state().acquisitions
    }

    /// Number of successful releases.
    pub fn release_count(&self) -> u32 {
        self.state().releases
    }

    pub fn release_attempts(&self) -> u32 {
        self.state().release_attempts
    }

    fn state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
