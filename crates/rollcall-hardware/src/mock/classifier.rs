//! Mock face classifier for testing and development.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{BoundingBox, Classification, Frame, HardwareError, Result, traits::Classifier};

#[derive(Debug)]
struct ClassifierState {
    faces_visible: bool,
    scripted: VecDeque<Classification>,
    failures: VecDeque<String>,
    fallback: Classification,
    latency: Duration,
    detections: u64,
    classifications: u64,
}

/// Mock classifier.
///
/// Detection reports a single centered face while faces are visible.
/// Classification fails once per queued failure, then returns scripted
/// results in order, then the fallback.
///
/// # Examples
///
/// ```
/// use rollcall_hardware::mock::MockClassifier;
/// use rollcall_hardware::traits::Classifier;
/// use rollcall_hardware::{Classification, Frame};
///
/// #[tokio::main]
/// async fn main() -> rollcall_hardware::Result<()> {
///     let (classifier, handle) = MockClassifier::new();
///     handle.set_faces_visible(true);
///     handle.push_result(Classification::recognized("7", 40.0));
///
///     let frame = Frame::filled(64, 48, 0, 1);
///     let regions = classifier.detect(&frame);
///     let result = classifier.classify(&frame, &regions[0]).await?;
///     assert_eq!(result, Classification::recognized("7", 40.0));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockClassifier {
    state: Arc<Mutex<ClassifierState>>,
}

impl MockClassifier {
    /// Create a classifier that sees no faces and answers `Unknown`.
    pub fn new() -> (Self, MockClassifierHandle) {
        let state = Arc::new(Mutex::new(ClassifierState {
            faces_visible: false,
            scripted: VecDeque::new(),
            failures: VecDeque::new(),
            fallback: Classification::Unknown,
            latency: Duration::ZERO,
            detections: 0,
            classifications: 0,
        }));

        let classifier = Self {
            state: Arc::clone(&state),
        };
        (classifier, MockClassifierHandle { state })
    }

    fn state(&self) -> MutexGuard<'_, ClassifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Classifier for MockClassifier {
    fn detect(&self, frame: &Frame) -> Vec<BoundingBox> {
        let mut state = self.state();
        state.detections += 1;
        if !state.faces_visible {
            return Vec::new();
        }
        let width = frame.width / 2;
        let height = frame.height / 2;
        vec![BoundingBox::new(
            (frame.width - width) / 2,
            (frame.height - height) / 2,
            width,
            height,
        )]
    }

    async fn classify(&self, _frame: &Frame, _region: &BoundingBox) -> Result<Classification> {
        let (result, latency) = {
            let mut state = self.state();
            state.classifications += 1;
            let result = match state.failures.pop_front() {
                Some(reason) => Err(HardwareError::classification(reason)),
                None => Ok(state
                    .scripted
                    .pop_front()
                    .unwrap_or_else(|| state.fallback.clone())),
            };
            (result, state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        result
    }
}

/// Handle for scripting a [`MockClassifier`].
#[derive(Debug, Clone)]
pub struct MockClassifierHandle {
    state: Arc<Mutex<ClassifierState>>,
}

impl MockClassifierHandle {
    /// Toggle whether detection finds a face.
    pub fn set_faces_visible(&self, visible: bool) {
        self.state().faces_visible = visible;
    }

    /// Queue a result for the next classification.
    pub fn push_result(&self, result: Classification) {
        self.state().scripted.push_back(result);
    }

    /// Make the next classification fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.state().failures.push_back(reason.into());
    }

    /// Result returned once the scripted queue is empty.
    pub fn set_fallback(&self, result: Classification) {
        self.state().fallback = result;
    }

    /// Simulated inference time.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn detect_count(&self) -> u64 {
        self.state().detections
    }

    pub fn classify_count(&self) -> u64 {
        self.state().classifications
    }

    fn state(&self) -> MutexGuard<'_, ClassifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
