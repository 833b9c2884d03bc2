//! Attendance orchestrator: wires the kiosk together.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rollcall_core::KioskConfig;
//! use rollcall_hardware::mock::{MockCamera, MockCardReader, MockClassifier};
//! use rollcall_session::{AttendanceOrchestrator, KioskEvent};
//! use rollcall_transport::LocalBroker;
//!
//! # async fn example() -> rollcall_session::Result<()> {
//! let (reader, _reader_handle) = MockCardReader::new();
//! let (camera, _camera_handle) = MockCamera::new();
//! let (classifier, _classifier_handle) = MockClassifier::new();
//! let broker = Arc::new(LocalBroker::new());
//!
//! let mut kiosk =
//!     AttendanceOrchestrator::new(KioskConfig::default(), broker, reader, camera, classifier);
//! let mut events = kiosk.events();
//! kiosk.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let KioskEvent::Submission { subject, result, .. } = event {
//!         println!("{subject}: {:?}", result.raw_response);
//!     }
//! }
//! kiosk.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use rollcall_core::{KioskConfig, SessionState, control_topic};
use rollcall_hardware::{CardReaderDriver, Classifier, FrameSource};
use rollcall_transport::PubSubChannel;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::capture::CapturePipeline;
use crate::card_reader::CardReaderLoop;
use crate::controller::SessionController;
use crate::display::{DisplayFrames, DisplayQueue, display_queue};
use crate::error::{Result, SessionError};
use crate::events::{EventBus, KioskEvents, fault_channel};
use crate::gateway::SubmissionGateway;

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Root of the kiosk: owns the devices until started, then the control
/// loop that drives them.
pub struct AttendanceOrchestrator<R, S, K, C> {
    config: KioskConfig,
    channel: Arc<C>,
    devices: Option<(R, S, K)>,
    events: EventBus,
    display: DisplayQueue,
    frames: Option<DisplayFrames>,
    state_tx: watch::Sender<SessionState>,
    running: Option<Running>,
}

impl<R, S, K, C> AttendanceOrchestrator<R, S, K, C>
where
    R: CardReaderDriver,
    S: FrameSource,
    K: Classifier,
    C: PubSubChannel,
{
    pub fn new(config: KioskConfig, channel: Arc<C>, reader: R, source: S, classifier: K) -> Self {
        let (display, frames) = display_queue();
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            channel,
            devices: Some((reader, source, classifier)),
            events: EventBus::new(),
            display,
            frames: Some(frames),
            state_tx,
            running: None,
        }
    }

    /// Subscribe to the control topic and start the control loop.
    ///
    /// Control messages published after this returns are handled.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyStarted`] on a second call, or the transport
    /// error if the control subscription cannot be opened.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() || self.devices.is_none() {
            return Err(SessionError::AlreadyStarted);
        }

        let filter = control_topic(&self.config.device.control_filter);
        let control = self.channel.subscribe(&filter).await?;
        let Some((reader, source, classifier)) = self.devices.take() else {
            return Err(SessionError::AlreadyStarted);
        };

        let gateway = SubmissionGateway::new(
            Arc::clone(&self.channel),
            self.config.device.device_id.clone(),
            self.config.gateway.response_timeout(),
        );
        let (fault_tx, fault_rx) = fault_channel();
        let card_reader = CardReaderLoop::new(
            reader,
            gateway.clone(),
            self.config.card_reader.clone(),
            self.events.clone(),
            fault_tx.clone(),
        );
        let capture = CapturePipeline::new(
            source,
            classifier,
            gateway,
            self.config.capture.clone(),
            self.display.clone(),
            self.events.clone(),
            fault_tx,
        );
        let controller = SessionController::new(card_reader, capture, self.events.clone())
            .with_state_sender(self.state_tx.clone());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(controller.run(control, fault_rx, shutdown.clone()));
        self.running = Some(Running { shutdown, handle });

        info!(
            device_id = %self.config.device.device_id,
            control = %filter,
            "orchestrator started"
        );
        Ok(())
    }

    /// Stop the control loop and disarm both subsystems.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] if not started, or
    /// [`SessionError::ControlLoop`] if the loop task panicked.
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(SessionError::NotRunning)?;
        running.shutdown.cancel();
        running
            .handle
            .await
            .map_err(|e| SessionError::ControlLoop(e.to_string()))?;
        info!("orchestrator stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    /// A new consumer of kiosk events.
    pub fn events(&self) -> KioskEvents {
        self.events.subscribe()
    }

    /// The display frame stream. Available once.
    pub fn frames(&mut self) -> Option<DisplayFrames> {
        self.frames.take()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch the session state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rollcall_hardware::mock::{MockCamera, MockCardReader, MockClassifier};
    use rollcall_transport::LocalBroker;

    type MockKiosk = AttendanceOrchestrator<MockCardReader, MockCamera, MockClassifier, LocalBroker>;

    fn kiosk(broker: &LocalBroker) -> MockKiosk {
        let (reader, _) = MockCardReader::new();
        let (camera, _) = MockCamera::new();
        let (classifier, _) = MockClassifier::new();
        AttendanceOrchestrator::new(
            KioskConfig::default(),
            Arc::new(broker.clone()),
            reader,
            camera,
            classifier,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let broker = LocalBroker::new();
        let mut kiosk = kiosk(&broker);
        kiosk.start().await.unwrap();
        assert!(kiosk.is_running());
        assert!(matches!(kiosk.start().await, Err(SessionError::AlreadyStarted)));
        kiosk.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_fails() {
        let broker = LocalBroker::new();
        let mut kiosk = kiosk(&broker);
        assert!(matches!(kiosk.stop().await, Err(SessionError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_offline_keeps_devices() {
        let broker = LocalBroker::new();
        let mut kiosk = kiosk(&broker);
        broker.set_offline(true);
        assert!(matches!(kiosk.start().await, Err(SessionError::Transport(_))));

        broker.set_offline(false);
        kiosk.start().await.unwrap();
        kiosk.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_message_arms_card_reader() {
        let broker = LocalBroker::new();
        let mut kiosk = kiosk(&broker);
        kiosk.start().await.unwrap();
        let mut state = kiosk.watch_state();

        broker
            .publish("devices/4/control", Bytes::from(r#"{"action":"start-check-in"}"#))
            .await
            .unwrap();
        state.changed().await.unwrap();
        assert_eq!(kiosk.state(), SessionState::CheckInArmed);

        kiosk.stop().await.unwrap();
        assert!(!kiosk.is_running());
        assert_eq!(broker.subscription_count(), 0);
    }

    #[test]
    fn test_frames_are_taken_once() {
        let broker = LocalBroker::new();
        let mut kiosk = kiosk(&broker);
        assert!(kiosk.frames().is_some());
        assert!(kiosk.frames().is_none());
    }
}
