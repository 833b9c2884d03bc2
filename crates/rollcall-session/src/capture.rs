//! Camera capture pipeline.
//!
//! While armed, one worker opens the frame source, waits for it to settle,
//! then loops: acquire a frame, detect faces on it, classify the largest
//! face when classification is due, submit recognized identities, and hand
//! an annotated frame to the display queue.
//!
//! Classification is due when the classify interval has elapsed since the
//! previous one and no submission is pending. The same identity is not
//! submitted again within the cooldown; a failed submission lifts that
//! restriction so the next recognition retries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rollcall_core::{AttendanceMethod, CaptureConfig, CapturedIdentity, SubjectId, SubmissionResult};
use rollcall_hardware::{BoundingBox, Classification, Classifier, FrameSource};
use rollcall_transport::PubSubChannel;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::Armable;
use crate::display::{DisplayFrame, DisplayQueue};
use crate::error::SessionError;
use crate::events::{EventBus, FaultReport, FaultSender, KioskEvent, Subsystem};
use crate::gateway::SubmissionGateway;
use crate::worker::{Worker, sleep_or_cancel};

const UNKNOWN_CAPTION: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
struct DebounceRecord {
    identity: SubjectId,
    last_sent_at: Instant,
}

/// State shared between the worker, its submission tasks, and `disarm`.
#[derive(Debug, Default)]
struct PipelineState {
    pending: bool,
    debounce: Option<DebounceRecord>,
    source_open: bool,
    caption: String,
}

/// Everything a capture worker needs, cheap to clone.
struct CaptureContext<S, K, C> {
    source: Arc<S>,
    classifier: Arc<K>,
    gateway: SubmissionGateway<C>,
    config: Arc<CaptureConfig>,
    display: DisplayQueue,
    events: EventBus,
    faults: FaultSender,
    state: Arc<Mutex<PipelineState>>,
}

impl<S, K, C> Clone for CaptureContext<S, K, C> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            classifier: Arc::clone(&self.classifier),
            gateway: self.gateway.clone(),
            config: Arc::clone(&self.config),
            display: self.display.clone(),
            events: self.events.clone(),
            faults: self.faults.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Camera-based check-out capture.
pub struct CapturePipeline<S, K, C> {
    ctx: CaptureContext<S, K, C>,
    worker: Option<Worker>,
    generation: u64,
}

impl<S, K, C> CapturePipeline<S, K, C>
where
    S: FrameSource,
    K: Classifier,
    C: PubSubChannel,
{
    pub fn new(
        source: S,
        classifier: K,
        gateway: SubmissionGateway<C>,
        config: CaptureConfig,
        display: DisplayQueue,
        events: EventBus,
        faults: FaultSender,
    ) -> Self {
        Self {
            ctx: CaptureContext {
                source: Arc::new(source),
                classifier: Arc::new(classifier),
                gateway,
                config: Arc::new(config),
                display,
                events,
                faults,
                state: Arc::new(Mutex::new(PipelineState::default())),
            },
            worker: None,
            generation: 0,
        }
    }

    /// True while a submission started by this pipeline is in flight.
    pub fn is_pending(&self) -> bool {
        self.ctx.state().pending
    }

    /// Frames dropped because the display queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.ctx.display.dropped()
    }
}

impl<S, K, C> Armable for CapturePipeline<S, K, C>
where
    S: FrameSource,
    K: Classifier,
    C: PubSubChannel,
{
    fn subsystem(&self) -> Subsystem {
        Subsystem::Capture
    }

    fn is_armed(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn arm(&mut self) {
        if self.is_armed() {
            return;
        }
        {
            // Each session starts with no caption and no debounce record.
            let mut state = self.ctx.state();
            state.caption.clear();
            state.debounce = None;
        }
        self.generation += 1;
        let generation = self.generation;
        let ctx = self.ctx.clone();
        self.worker = Some(Worker::spawn(move |token| ctx.run(token, generation)));
        info!(generation, "capture pipeline armed");
    }

    async fn disarm(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            // Cancel under the state lock so no submission starts afterwards.
            let _state = self.ctx.state();
            worker.token().cancel();
        }

        let joined = worker.join(self.ctx.config.join_timeout()).await;
        let was_open = std::mem::replace(&mut self.ctx.state().source_open, false);
        if was_open || !joined {
            release_source(self.ctx.source.as_ref()).await;
        }
        info!(generation = self.generation, "capture pipeline disarmed");
    }
}

impl<S, K, C> CaptureContext<S, K, C>
where
    S: FrameSource,
    K: Classifier,
    C: PubSubChannel,
{
    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self, token: CancellationToken, generation: u64) {
        if !self.open_source(&token, generation).await {
            return;
        }
        if !sleep_or_cancel(&token, self.config.settle_delay()).await {
            return;
        }
        self.events.emit(KioskEvent::CaptureReady);
        info!("capture ready");

        let acquire_timeout = self.config.acquire_timeout();
        let mut errors = 0u32;
        let mut last_classified: Option<Instant> = None;

        loop {
            let acquired = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                r = tokio::time::timeout(acquire_timeout, self.source.acquire()) => r,
            };
            let acquired = match acquired {
                Ok(Ok(frame)) => Ok(frame),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no frame within {}ms", acquire_timeout.as_millis())),
            };
            let frame = match acquired {
                Ok(frame) => {
                    errors = 0;
                    frame
                }
                Err(reason) => {
                    errors += 1;
                    warn!(%reason, errors, "frame acquisition failed");
                    if errors >= self.config.max_consecutive_errors {
                        let error = SessionError::too_many_errors(Subsystem::Capture, errors);
                        self.fail(&token, generation, error).await;
                        break;
                    }
                    continue;
                }
            };

            let region = BoundingBox::largest(&self.classifier.detect(&frame));
            if let Some(region) = region {
                let now = Instant::now();
                if self.classification_due(last_classified, now) {
                    last_classified = Some(now);
                    let classified = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        r = self.classifier.classify(&frame, &region) => r,
                    };
                    self.on_classified(&token, classified);
                }
            }

            let caption = self.state().caption.clone();
            self.display.offer(DisplayFrame::annotate(frame, region, caption));
        }
        debug!(generation, "capture worker stopped");
    }

    /// Open the source, retrying with a delay. Returns `false` if the worker
    /// should stop.
    async fn open_source(&self, token: &CancellationToken, generation: u64) -> bool {
        let attempts = self.config.open_attempts.max(1);
        for attempt in 1..=attempts {
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                r = self.source.open() => r,
            };
            match opened {
                Ok(()) => {
                    self.state().source_open = true;
                    info!(attempt, "frame source opened");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "could not open frame source");
                }
            }
            if attempt < attempts && !sleep_or_cancel(token, self.config.open_retry_delay()).await {
                return false;
            }
        }
        let error = SessionError::open_failed(Subsystem::Capture, attempts);
        self.fail(token, generation, error).await;
        false
    }

    fn classification_due(&self, last: Option<Instant>, now: Instant) -> bool {
        let interval_elapsed =
            last.is_none_or(|t| now.duration_since(t) >= self.config.classify_interval());
        interval_elapsed && !self.state().pending
    }

    fn on_classified(
        &self,
        token: &CancellationToken,
        classified: rollcall_hardware::Result<Classification>,
    ) {
        let (identity, confidence) = match classified {
            Ok(Classification::Recognized {
                identity,
                confidence,
            }) => (identity, confidence),
            Ok(Classification::Unknown) => {
                self.state().caption = UNKNOWN_CAPTION.to_string();
                return;
            }
            Err(e) => {
                warn!(error = %e, "classification failed");
                return;
            }
        };

        let subject = match SubjectId::new(&identity) {
            Ok(subject) => subject,
            Err(e) => {
                warn!(error = %e, "classifier returned an unusable label");
                return;
            }
        };
        let captured = CapturedIdentity::new(subject, confidence);
        if !captured.is_accepted(self.config.acceptance_threshold) {
            debug!(identity = %captured.identity, confidence, "below acceptance");
            self.state().caption = UNKNOWN_CAPTION.to_string();
            return;
        }

        self.state().caption = format!("{} ({:.1})", captured.identity, captured.confidence);
        self.begin_submission(token, captured.identity);
    }

    /// Start a submission for `subject` unless cancelled, pending, debounced,
    /// or already in flight elsewhere.
    fn begin_submission(&self, token: &CancellationToken, subject: SubjectId) {
        let mut state = self.state();
        if token.is_cancelled() || state.pending {
            return;
        }

        let now = Instant::now();
        if let Some(record) = &state.debounce {
            if record.identity == subject
                && now.duration_since(record.last_sent_at) < self.config.cooldown()
            {
                debug!(%subject, "debounced");
                return;
            }
        }

        let Some(guard) = self.gateway.reserve(&subject) else {
            return;
        };
        state.pending = true;
        state.debounce = Some(DebounceRecord {
            identity: subject.clone(),
            last_sent_at: now,
        });

        let ctx = self.clone();
        tokio::spawn(async move {
            let result = ctx
                .gateway
                .submit_reserved(AttendanceMethod::CheckOut, guard, &ctx.events)
                .await;
            ctx.on_submitted(&subject, &result);
        });
    }

    fn on_submitted(&self, subject: &SubjectId, result: &SubmissionResult) {
        let mut state = self.state();
        state.pending = false;
        state.caption = match (&result.raw_response, &result.failure) {
            (Some(text), _) => text.clone(),
            (None, Some(failure)) => failure.to_string(),
            (None, None) => String::new(),
        };
        if !result.succeeded
            && state
                .debounce
                .as_ref()
                .is_some_and(|record| &record.identity == subject)
        {
            state.debounce = None;
        }
    }

    /// Disarm from inside the worker: cancel, release the source, report.
    async fn fail(&self, token: &CancellationToken, generation: u64, error: SessionError) {
        {
            let _state = self.state();
            token.cancel();
        }
        error!(error = %error, "capture pipeline disarming itself");

        let was_open = std::mem::replace(&mut self.state().source_open, false);
        if was_open {
            release_source(self.source.as_ref()).await;
        }

        let _ = self.faults.send(FaultReport {
            subsystem: Subsystem::Capture,
            generation,
            reason: error.to_string(),
        });
    }
}

/// Release the source, retrying once before giving up.
async fn release_source<S: FrameSource>(source: &S) {
    let Err(first) = source.release().await else {
        debug!("frame source released");
        return;
    };
    warn!(error = %first, "release failed, retrying");
    match source.release().await {
        Ok(()) => debug!("frame source released on retry"),
        Err(e) => error!(error = %e, "could not release frame source"),
    }
}
