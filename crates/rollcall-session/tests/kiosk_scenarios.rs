//! End-to-end kiosk scenarios on the local broker with mock devices.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rollcall_core::{
    AttendanceMethod, ControlAction, DeviceId, KioskConfig, SessionState, SubjectId,
    SubmissionFailure, SubmissionResult,
};
use rollcall_hardware::Classification;
use rollcall_hardware::mock::{
    MockCamera, MockCameraHandle, MockCardReader, MockCardReaderHandle, MockClassifier,
    MockClassifierHandle,
};
use rollcall_session::{AttendanceOrchestrator, KioskEvent, KioskEvents, Subsystem};
use rollcall_transport::{LocalBroker, PubSubChannel};
use tokio::time::Instant;

type Kiosk = AttendanceOrchestrator<MockCardReader, MockCamera, MockClassifier, LocalBroker>;

struct Harness {
    kiosk: Kiosk,
    broker: LocalBroker,
    reader: MockCardReaderHandle,
    camera: MockCameraHandle,
    classifier: MockClassifierHandle,
    events: KioskEvents,
}

async fn harness(config: KioskConfig) -> Harness {
    let broker = LocalBroker::new();
    let (reader, reader_handle) = MockCardReader::new();
    let (camera, camera_handle) = MockCamera::new();
    let (classifier, classifier_handle) = MockClassifier::new();
    let mut kiosk = AttendanceOrchestrator::new(
        config,
        Arc::new(broker.clone()),
        reader,
        camera,
        classifier,
    );
    let events = kiosk.events();
    kiosk.start().await.unwrap();
    Harness {
        kiosk,
        broker,
        reader: reader_handle,
        camera: camera_handle,
        classifier: classifier_handle,
        events,
    }
}

/// Answer every request for `method` with `reply`, addressed to the
/// requesting device.
async fn respond_with(broker: &LocalBroker, method: AttendanceMethod, reply: &'static str) {
    let mut requests = broker.subscribe(&method.request_topic()).await.unwrap();
    let responder = broker.clone();
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let body: serde_json::Value = serde_json::from_slice(&request.payload).unwrap();
            let device = DeviceId::new(body["device_id"].as_str().unwrap()).unwrap();
            let topic = method.response_topic(&device);
            let _ = responder.publish(&topic, Bytes::from(reply)).await;
        }
    });
}

async fn send_control(h: &Harness, payload: &str) -> SessionState {
    let mut state = h.kiosk.watch_state();
    h.broker
        .publish("devices/4/control", Bytes::copy_from_slice(payload.as_bytes()))
        .await
        .unwrap();
    state.changed().await.unwrap();
    *state.borrow_and_update()
}

async fn next_submission(
    events: &mut KioskEvents,
) -> (AttendanceMethod, SubjectId, SubmissionResult) {
    loop {
        match events.recv().await {
            Some(KioskEvent::Submission { method, subject, result }) => {
                return (method, subject, result);
            }
            Some(_) => continue,
            None => panic!("event stream closed"),
        }
    }
}

async fn next_fault(events: &mut KioskEvents) -> (Subsystem, String) {
    loop {
        match events.recv().await {
            Some(KioskEvent::Fault { subsystem, reason }) => return (subsystem, reason),
            Some(_) => continue,
            None => panic!("event stream closed"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn check_in_card_gets_welcome() {
    let mut h = harness(KioskConfig::default()).await;
    respond_with(&h.broker, AttendanceMethod::CheckIn, "Welcome").await;

    let state = send_control(&h, r#"{"action":"start-check-in"}"#).await;
    assert_eq!(state, SessionState::CheckInArmed);
    h.reader.present_card(&[12, 34, 56]).await.unwrap();

    let (method, subject, result) = next_submission(&mut h.events).await;
    assert_eq!(method, AttendanceMethod::CheckIn);
    assert_eq!(subject.as_str(), "12-34-56");
    assert_eq!(result.raw_response.as_deref(), Some("Welcome"));
    assert!(result.succeeded);

    let requests = h.broker.published_matching("attendance/check-in/request");
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].payload).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"rfid_tag": "12-34-56", "device_id": "4", "marked_by": "rfid"})
    );

    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn check_in_without_response_times_out() {
    let mut h = harness(KioskConfig::default()).await;
    send_control(&h, r#"{"action":"start-check-in"}"#).await;

    let started = Instant::now();
    h.reader.present_card(&[12, 34, 56]).await.unwrap();
    let (_, subject, result) = next_submission(&mut h.events).await;
    let elapsed = started.elapsed();

    assert_eq!(subject.as_str(), "12-34-56");
    assert!(result.is_timeout());
    assert!(!result.succeeded);
    assert_eq!(result.raw_response, None);
    assert!(
        elapsed >= Duration::from_millis(9_800) && elapsed <= Duration::from_millis(10_200),
        "timed out after {elapsed:?}"
    );

    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn same_identity_within_cooldown_is_submitted_once() {
    let mut config = KioskConfig::default();
    config.capture.classify_interval_ms = 1_000;
    let mut h = harness(config).await;
    respond_with(&h.broker, AttendanceMethod::CheckOut, "Goodbye").await;

    h.classifier.set_faces_visible(true);
    h.classifier.push_result(Classification::recognized("7", 40.0));
    h.classifier.push_result(Classification::recognized("7", 40.0));

    send_control(&h, r#"{"action":"start-check-out"}"#).await;
    let (method, subject, result) = next_submission(&mut h.events).await;
    assert_eq!(method, AttendanceMethod::CheckOut);
    assert_eq!(subject.as_str(), "7");
    assert_eq!(result.raw_response.as_deref(), Some("Goodbye"));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(h.classifier.classify_count() >= 2);
    assert_eq!(
        h.broker
            .published_matching("attendance/check-out/request")
            .len(),
        1
    );
    while let Some(event) = h.events.try_recv() {
        assert!(!matches!(event, KioskEvent::Submission { .. }), "{event:?}");
    }

    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unaccepted_confidence_is_not_submitted() {
    let mut h = harness(KioskConfig::default()).await;
    h.classifier.set_faces_visible(true);
    h.classifier.set_fallback(Classification::recognized("7", 95.0));

    send_control(&h, r#"{"action":"start-check-out"}"#).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(h.classifier.classify_count() >= 2);
    assert!(h.broker.published_matching("attendance/+/request").is_empty());
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_with_stalled_source_is_bounded() {
    let mut h = harness(KioskConfig::default()).await;
    let mut frames = h.kiosk.frames().unwrap();
    send_control(&h, r#"{"action":"start-check-out"}"#).await;

    loop {
        if matches!(h.events.recv().await, Some(KioskEvent::CaptureReady)) {
            break;
        }
    }
    assert!(frames.recv().await.is_some());

    h.camera.set_stalled(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), h.kiosk.stop())
        .await
        .expect("stop did not return")
        .unwrap();
    assert!(started.elapsed() <= Duration::from_secs(3));
    assert_eq!(h.camera.release_count(), 1);
    assert!(!h.camera.is_open());
}

#[tokio::test(start_paused = true)]
async fn display_queue_never_exceeds_two_frames() {
    let mut h = harness(KioskConfig::default()).await;
    let frames = h.kiosk.frames().unwrap();
    send_control(&h, r#"{"action":"start-check-out"}"#).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(frames.len(), 2);
    assert!(frames.dropped() > 0);
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn capture_fault_returns_to_idle() {
    let mut h = harness(KioskConfig::default()).await;
    for _ in 0..5 {
        h.camera.inject_fault("sensor timeout");
    }

    let mut state = h.kiosk.watch_state();
    send_control(&h, r#"{"action":"start-check-out"}"#).await;
    let (subsystem, reason) = next_fault(&mut h.events).await;
    assert_eq!(subsystem, Subsystem::Capture);
    assert_eq!(reason, "capture pipeline failed 5 times in a row");

    match h.events.recv().await {
        Some(KioskEvent::SessionChanged { from, to, action }) => {
            assert_eq!(from, SessionState::CheckOutArmed);
            assert_eq!(to, SessionState::Idle);
            assert_eq!(action, None);
        }
        other => panic!("unexpected event {other:?}"),
    }
    state.wait_for(|s| *s == SessionState::Idle).await.unwrap();
    assert_eq!(h.camera.release_count(), 1);
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn camera_open_is_retried() {
    let mut h = harness(KioskConfig::default()).await;
    h.camera.fail_next_opens(2);
    send_control(&h, r#"{"action":"start-check-out"}"#).await;

    loop {
        if matches!(h.events.recv().await, Some(KioskEvent::CaptureReady)) {
            break;
        }
    }
    assert_eq!(h.camera.open_attempts(), 3);
    assert_eq!(h.kiosk.state(), SessionState::CheckOutArmed);
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn camera_that_never_opens_faults() {
    let mut h = harness(KioskConfig::default()).await;
    h.camera.fail_next_opens(3);
    send_control(&h, r#"{"action":"start-check-out"}"#).await;

    let (subsystem, reason) = next_fault(&mut h.events).await;
    assert_eq!(subsystem, Subsystem::Capture);
    assert_eq!(reason, "capture pipeline could not be opened after 3 attempts");
    assert_eq!(h.camera.release_count(), 0);
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reader_that_cannot_recover_faults() {
    let mut h = harness(KioskConfig::default()).await;
    h.reader.set_faulty(true);
    h.reader.fail_reinitialize(true);
    send_control(&h, r#"{"action":"start-check-in"}"#).await;

    let (subsystem, reason) = next_fault(&mut h.events).await;
    assert_eq!(subsystem, Subsystem::CardReader);
    assert!(reason.starts_with("reinitialization failed"));
    assert_eq!(h.reader.reinitialize_count(), 1);

    let mut state = h.kiosk.watch_state();
    state.wait_for(|s| *s == SessionState::Idle).await.unwrap();
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reader_recovers_after_reinitialization() {
    let mut h = harness(KioskConfig::default()).await;
    respond_with(&h.broker, AttendanceMethod::CheckIn, "Welcome").await;
    h.reader.set_faulty(true);
    send_control(&h, r#"{"action":"start-check-in"}"#).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.reader.reinitialize_count(), 1);

    h.reader.present_card(&[0xde, 0xad]).await.unwrap();
    let (_, subject, result) = next_submission(&mut h.events).await;
    assert_eq!(subject.as_str(), "222-173");
    assert!(result.succeeded);
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_or_malformed_control_goes_idle() {
    let mut h = harness(KioskConfig::default()).await;

    for payload in [r#"{"action":"reboot"}"#, "not json", r#"{"mode":"check-in"}"#] {
        assert_eq!(
            send_control(&h, r#"{"action":"start-check-in"}"#).await,
            SessionState::CheckInArmed
        );
        assert_eq!(send_control(&h, payload).await, SessionState::Idle);
    }

    let mut unknown = 0;
    while let Some(event) = h.events.try_recv() {
        if let KioskEvent::SessionChanged { to, action, .. } = event {
            if action == Some(ControlAction::Unknown) {
                assert_eq!(to, SessionState::Idle);
                unknown += 1;
            }
        }
    }
    assert_eq!(unknown, 3);
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn session_aliases_and_end_actions() {
    let mut h = harness(KioskConfig::default()).await;
    assert_eq!(
        send_control(&h, r#"{"action":"check-out"}"#).await,
        SessionState::CheckOutArmed
    );
    assert_eq!(
        send_control(&h, r#"{"action":"end-check-out"}"#).await,
        SessionState::Ended
    );
    assert_eq!(
        send_control(&h, r#"{"action":"check-in"}"#).await,
        SessionState::CheckInArmed
    );
    h.kiosk.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn offline_broker_fails_submission() {
    let mut h = harness(KioskConfig::default()).await;
    send_control(&h, r#"{"action":"start-check-in"}"#).await;
    h.broker.set_offline(true);

    h.reader.present_card(&[1, 2, 3]).await.unwrap();
    let (_, subject, result) = next_submission(&mut h.events).await;
    assert_eq!(subject.as_str(), "1-2-3");
    assert!(!result.succeeded);
    assert!(matches!(result.failure, Some(SubmissionFailure::Transport(_))));
    assert!(h.broker.published_matching("attendance/#").is_empty());

    h.broker.set_offline(false);
    h.kiosk.stop().await.unwrap();
}
