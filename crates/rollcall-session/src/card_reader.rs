//! Card reader polling loop.
//!
//! While armed, the worker polls the reader with a short bounded timeout and
//! rechecks cancellation between polls. Each card read is submitted as a
//! check-in unless a submission for the same card is already in flight.
//! There is no cooldown.
//!
//! After `max_consecutive_errors` failed polls the reader is reinitialized
//! once. If that fails, or another streak of errors follows before a
//! successful poll, the loop disarms itself and reports a fault.

use std::sync::Arc;

use rollcall_core::{AttendanceMethod, CardReaderConfig, SubjectId};
use rollcall_hardware::{CardData, CardReaderDriver};
use rollcall_transport::PubSubChannel;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::Armable;
use crate::error::SessionError;
use crate::events::{EventBus, FaultReport, FaultSender, Subsystem};
use crate::gateway::SubmissionGateway;
use crate::worker::Worker;

struct ReaderContext<R, C> {
    driver: Arc<Mutex<R>>,
    gateway: SubmissionGateway<C>,
    config: Arc<CardReaderConfig>,
    events: EventBus,
    faults: FaultSender,
}

impl<R, C> Clone for ReaderContext<R, C> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            gateway: self.gateway.clone(),
            config: Arc::clone(&self.config),
            events: self.events.clone(),
            faults: self.faults.clone(),
        }
    }
}

/// Card-based check-in capture.
///
/// The driver sits behind an async mutex held by the running worker, so a
/// re-armed worker waits for the previous worker's last poll to return
/// before it touches the hardware.
pub struct CardReaderLoop<R, C> {
    ctx: ReaderContext<R, C>,
    worker: Option<Worker>,
    generation: u64,
}

impl<R, C> CardReaderLoop<R, C>
where
    R: CardReaderDriver,
    C: PubSubChannel,
{
    pub fn new(
        driver: R,
        gateway: SubmissionGateway<C>,
        config: CardReaderConfig,
        events: EventBus,
        faults: FaultSender,
    ) -> Self {
        Self {
            ctx: ReaderContext {
                driver: Arc::new(Mutex::new(driver)),
                gateway,
                config: Arc::new(config),
                events,
                faults,
            },
            worker: None,
            generation: 0,
        }
    }
}

impl<R, C> Armable for CardReaderLoop<R, C>
where
    R: CardReaderDriver,
    C: PubSubChannel,
{
    fn subsystem(&self) -> Subsystem {
        Subsystem::CardReader
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
        self.generation += 1;
        let generation = self.generation;
        let ctx = self.ctx.clone();
        self.worker = Some(Worker::spawn(move |token| ctx.run(token, generation)));
        info!(generation, "card reader armed");
    }

    async fn disarm(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.token().cancel();
        worker.join(self.ctx.config.join_timeout()).await;
        info!(generation = self.generation, "card reader disarmed");
    }
}

impl<R, C> ReaderContext<R, C>
where
    R: CardReaderDriver,
    C: PubSubChannel,
{
    async fn run(self, token: CancellationToken, generation: u64) {
        let mut driver = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            driver = Arc::clone(&self.driver).lock_owned() => driver,
        };

        let poll_timeout = self.config.poll_timeout();
        let max_errors = self.config.max_consecutive_errors.max(1);
        let mut errors = 0u32;
        let mut reinitialized = false;

        while !token.is_cancelled() {
            let card = match driver.poll_once(poll_timeout).await {
                Ok(card) => {
                    errors = 0;
                    reinitialized = false;
                    card
                }
                Err(e) => {
                    errors += 1;
                    warn!(error = %e, errors, "card poll failed");
                    if errors < max_errors {
                        continue;
                    }
                    if reinitialized {
                        let error = SessionError::too_many_errors(Subsystem::CardReader, errors);
                        self.fail(&token, generation, error.to_string());
                        break;
                    }

                    reinitialized = true;
                    errors = 0;
                    if let Err(e) = driver.reinitialize().await {
                        self.fail(&token, generation, format!("reinitialization failed: {e}"));
                        break;
                    }
                    info!("card reader reinitialized");
                    continue;
                }
            };

            if let Some(card) = card {
                self.on_card(&token, card);
            }
        }
        debug!(generation, "card reader worker stopped");
    }

    fn on_card(&self, token: &CancellationToken, card: CardData) {
        let subject = match SubjectId::new(&card.uid_dashed()) {
            Ok(subject) => subject,
            Err(e) => {
                warn!(error = %e, "unusable card uid");
                return;
            }
        };
        if token.is_cancelled() {
            return;
        }
        let Some(guard) = self.gateway.reserve(&subject) else {
            debug!(%subject, "card already being submitted");
            return;
        };

        info!(%subject, "card read");
        let gateway = self.gateway.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            gateway
                .submit_reserved(AttendanceMethod::CheckIn, guard, &events)
                .await;
        });
    }

    fn fail(&self, token: &CancellationToken, generation: u64, reason: String) {
        token.cancel();
        error!(%reason, "card reader disarming itself");
        let _ = self.faults.send(FaultReport {
            subsystem: Subsystem::CardReader,
            generation,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FaultReceiver, KioskEvent, fault_channel};
    use rollcall_core::DeviceId;
    use rollcall_hardware::mock::{MockCardReader, MockCardReaderHandle};
    use bytes::Bytes;
    use rollcall_transport::LocalBroker;
    use std::time::Duration;

    struct Fixture {
        reader_loop: CardReaderLoop<MockCardReader, LocalBroker>,
        reader: MockCardReaderHandle,
        broker: LocalBroker,
        events: EventBus,
        faults: FaultReceiver,
    }

    fn fixture() -> Fixture {
        let broker = LocalBroker::new();
        let (driver, reader) = MockCardReader::new();
        let gateway = SubmissionGateway::new(
            Arc::new(broker.clone()),
            DeviceId::default(),
            Duration::from_secs(10),
        );
        let events = EventBus::new();
        let (fault_tx, faults) = fault_channel();
        Fixture {
            reader_loop: CardReaderLoop::new(
                driver,
                gateway,
                CardReaderConfig::default(),
                events.clone(),
                fault_tx,
            ),
            reader,
            broker,
            events,
            faults,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_card_is_submitted_once_per_read() {
        let mut f = fixture();
        let mut events = f.events.subscribe();
        f.reader_loop.arm();
        f.reader.present_card(&[12, 34, 56]).await.unwrap();

        match events.recv().await {
            Some(KioskEvent::Submission { subject, method, .. }) => {
                assert_eq!(subject.as_str(), "12-34-56");
                assert_eq!(method, AttendanceMethod::CheckIn);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            f.broker
                .published_matching("attendance/check-in/request")
                .len(),
            1
        );
        f.reader_loop.disarm().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_cards_in_one_response_window_get_their_own_welcome() {
        let mut f = fixture();
        let method = AttendanceMethod::CheckIn;
        let mut requests = f.broker.subscribe(&method.request_topic()).await.unwrap();
        let backend = f.broker.clone();
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let body: serde_json::Value = serde_json::from_slice(&request.payload).unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
                let reply = format!("Welcome {}", body["rfid_tag"].as_str().unwrap());
                let topic = method.response_topic(&DeviceId::default());
                backend.publish(&topic, Bytes::from(reply)).await.unwrap();
            }
        });
        let mut events = f.events.subscribe();
        f.reader_loop.arm();

        f.reader.present_card(&[1, 1, 1]).await.unwrap();
        f.reader.present_card(&[2, 2, 2]).await.unwrap();

        let mut replies = Vec::new();
        while replies.len() < 2 {
            if let Some(KioskEvent::Submission { subject, result, .. }) = events.recv().await {
                replies.push((subject.as_str().to_string(), result.raw_response));
            }
        }
        replies.sort();
        assert_eq!(
            replies,
            vec![
                ("1-1-1".to_string(), Some("Welcome 1-1-1".to_string())),
                ("2-2-2".to_string(), Some("Welcome 2-2-2".to_string())),
            ]
        );
        f.reader_loop.disarm().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_card_while_in_flight_is_skipped() {
        let mut f = fixture();
        f.reader_loop.arm();
        f.reader.present_card(&[1, 2, 3]).await.unwrap();
        f.reader.present_card(&[1, 2, 3]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            f.broker
                .published_matching("attendance/check-in/request")
                .len(),
            1
        );
        f.reader_loop.disarm().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinitializes_after_error_streak() {
        let mut f = fixture();
        f.reader.set_faulty(true);
        f.reader_loop.arm();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.reader.reinitialize_count(), 1);
        assert!(f.reader_loop.is_armed());
        assert!(f.faults.try_recv().is_err());
        f.reader_loop.disarm().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_streak_is_fatal() {
        let mut f = fixture();
        for _ in 0..6 {
            f.reader.inject_fault("CRC").await.unwrap();
        }
        f.reader_loop.arm();

        let report = f.faults.recv().await.unwrap();
        assert_eq!(report.subsystem, Subsystem::CardReader);
        assert_eq!(f.reader.reinitialize_count(), 1);
        assert!(!f.reader_loop.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reinitialization_is_fatal() {
        let mut f = fixture();
        f.reader.set_faulty(true);
        f.reader.fail_reinitialize(true);
        f.reader_loop.arm();

        let report = f.faults.recv().await.unwrap();
        assert!(report.reason.starts_with("reinitialization failed"));
        assert_eq!(report.generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_returns_within_a_poll() {
        let mut f = fixture();
        f.reader_loop.arm();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = tokio::time::Instant::now();
        f.reader_loop.disarm().await;
        assert!(started.elapsed() <= Duration::from_millis(500));
        assert!(!f.reader_loop.is_armed());
    }
}
