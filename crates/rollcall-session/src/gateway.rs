//! Submission gateway.
//!
//! Publishes one attendance request per submission, waits for the
//! correlated response, and tracks which subjects have a submission in
//! flight so that the card reader and the capture pipeline never submit for
//! the same subject at once.
//!
//! Responses carry no correlation id, only the device's response topic, so
//! requests for one method are serialized: a second request waits until the
//! first has its response or timed out before it subscribes and publishes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rollcall_core::{
    AttendanceMethod, DeviceId, SubjectId, SubmissionFailure, SubmissionRequest, SubmissionResult,
};
use rollcall_transport::{PubSubChannel, correlation};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::events::{EventBus, KioskEvent};

type InFlight = Arc<Mutex<HashSet<SubjectId>>>;

fn lock(in_flight: &Mutex<HashSet<SubjectId>>) -> MutexGuard<'_, HashSet<SubjectId>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a subject as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    subject: SubjectId,
    in_flight: InFlight,
}

impl InFlightGuard {
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.subject);
    }
}

/// One outstanding request per response topic.
#[derive(Debug, Default)]
struct CorrelationSlots {
    check_in: AsyncMutex<()>,
    check_out: AsyncMutex<()>,
}

impl CorrelationSlots {
    fn slot(&self, method: AttendanceMethod) -> &AsyncMutex<()> {
        match method {
            AttendanceMethod::CheckIn => &self.check_in,
            AttendanceMethod::CheckOut => &self.check_out,
        }
    }
}

/// Publishes submissions and correlates their responses.
///
/// Cloning yields a handle sharing the same channel, in-flight set, and
/// correlation slots.
#[derive(Debug)]
pub struct SubmissionGateway<C> {
    channel: Arc<C>,
    device_id: DeviceId,
    response_timeout: Duration,
    in_flight: InFlight,
    slots: Arc<CorrelationSlots>,
}

impl<C> Clone for SubmissionGateway<C> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            device_id: self.device_id.clone(),
            response_timeout: self.response_timeout,
            in_flight: Arc::clone(&self.in_flight),
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<C: PubSubChannel> SubmissionGateway<C> {
    pub fn new(channel: Arc<C>, device_id: DeviceId, response_timeout: Duration) -> Self {
        Self {
            channel,
            device_id,
            response_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            slots: Arc::new(CorrelationSlots::default()),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Reserve `subject` for a submission.
    ///
    /// Returns `None` if a submission for it is already in flight.
    pub fn reserve(&self, subject: &SubjectId) -> Option<InFlightGuard> {
        if !lock(&self.in_flight).insert(subject.clone()) {
            debug!(%subject, "submission already in flight");
            return None;
        }
        Some(InFlightGuard {
            subject: subject.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, subject: &SubjectId) -> bool {
        lock(&self.in_flight).contains(subject)
    }

    /// Submit `subject` for `method` and wait for the correlated response.
    ///
    /// Publishes exactly once and never retries. Waits for any earlier
    /// request on the same method to finish first; the response timeout
    /// starts once this request is published. The outcome is always a
    /// [`SubmissionResult`]; failures are described by its `failure` field.
    pub async fn submit(&self, method: AttendanceMethod, subject: &SubjectId) -> SubmissionResult {
        let request = SubmissionRequest::new(method, subject.clone(), self.device_id.clone());
        let payload = match request.to_payload() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(%subject, error = %e, "could not encode submission");
                return SubmissionResult::failed(SubmissionFailure::Transport(e.to_string()));
            }
        };

        let _slot = self.slots.slot(method).lock().await;
        debug!(%method, %subject, topic = %request.request_topic(), "submitting");
        let outcome = correlation::request(
            self.channel.as_ref(),
            &request.request_topic(),
            payload,
            &request.response_topic(),
            self.response_timeout,
        )
        .await;

        let result = match outcome {
            Ok(publication) => match String::from_utf8(publication.payload.to_vec()) {
                Ok(text) => SubmissionResult::success(text),
                Err(e) => SubmissionResult::failed(SubmissionFailure::Decode(e.to_string())),
            },
            Err(e) if e.is_timeout() => SubmissionResult::timed_out(),
            Err(e) => SubmissionResult::failed(SubmissionFailure::Transport(e.to_string())),
        };

        match &result.failure {
            None => info!(%method, %subject, "submission acknowledged"),
            Some(failure) => warn!(%method, %subject, %failure, "submission failed"),
        }
        result
    }

    /// Submit and report the outcome as a [`KioskEvent::Submission`].
    ///
    /// The guard is released once the outcome is known.
    pub async fn submit_reserved(
        &self,
        method: AttendanceMethod,
        guard: InFlightGuard,
        events: &EventBus,
    ) -> SubmissionResult {
        let result = self.submit(method, guard.subject()).await;
        let subject = guard.subject().clone();
        drop(guard);

        events.emit(KioskEvent::Submission {
            method,
            subject,
            result: result.clone(),
        });
        result
    }
}
