//! Session controller: the single control loop.
//!
//! Control messages and subsystem fault reports are handled one at a time,
//! in arrival order. Each one moves the [`StateMachine`] and then converges
//! the subsystems on the new state, disarming before arming so that at most
//! one subsystem is ever armed.

use std::future::Future;

use rollcall_core::{ControlAction, SessionState};
use rollcall_transport::Subscription;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventBus, FaultReceiver, FaultReport, KioskEvent, Subsystem};
use crate::state_machine::{SessionTransition, StateMachine, armed_subsystem};

/// A capture subsystem that can be armed and disarmed.
pub trait Armable: Send {
    fn subsystem(&self) -> Subsystem;

    fn is_armed(&self) -> bool;

    /// Incremented on every arm; fault reports carry the value they were
    /// raised under.
    fn generation(&self) -> u64;

    /// Start the worker. No-op when already armed.
    fn arm(&mut self);

    /// Cancel the worker and wait, bounded, for it to stop. No-op when
    /// already disarmed.
    fn disarm(&mut self) -> impl Future<Output = ()> + Send;
}

/// Drives the card reader and the capture pipeline from control actions.
pub struct SessionController<A, B> {
    machine: StateMachine,
    card_reader: A,
    capture: B,
    events: EventBus,
    state_tx: watch::Sender<SessionState>,
}

impl<A, B> SessionController<A, B>
where
    A: Armable,
    B: Armable,
{
    pub fn new(card_reader: A, capture: B, events: EventBus) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            machine: StateMachine::new(),
            card_reader,
            capture,
            events,
            state_tx,
        }
    }

    /// Publish state changes on `state_tx` instead of an internal channel.
    pub fn with_state_sender(mut self, state_tx: watch::Sender<SessionState>) -> Self {
        state_tx.send_replace(self.machine.current_state());
        self.state_tx = state_tx;
        self
    }

    pub fn state(&self) -> SessionState {
        self.machine.current_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn card_reader(&self) -> &A {
        &self.card_reader
    }

    pub fn capture(&self) -> &B {
        &self.capture
    }

    /// Apply one control action.
    pub async fn apply(&mut self, action: ControlAction) -> SessionTransition {
        let transition = self.machine.on_control(action);
        self.converge(transition.to).await;
        self.announce(&transition);
        transition
    }

    /// Handle a fault report from a subsystem.
    ///
    /// Reports from a worker that is no longer the armed one are ignored.
    pub async fn handle_fault(&mut self, report: FaultReport) -> Option<SessionTransition> {
        let current_generation = match report.subsystem {
            Subsystem::CardReader => self.card_reader.generation(),
            Subsystem::Capture => self.capture.generation(),
        };
        let expected = armed_subsystem(self.machine.current_state());
        if report.generation != current_generation || expected != Some(report.subsystem) {
            debug!(
                subsystem = %report.subsystem,
                generation = report.generation,
                "ignoring stale fault report"
            );
            return None;
        }

        self.events.emit(KioskEvent::Fault {
            subsystem: report.subsystem,
            reason: report.reason.clone(),
        });
        let transition = self.machine.fault(report.subsystem, report.reason);
        self.converge(transition.to).await;
        self.announce(&transition);
        Some(transition)
    }

    /// Disarm both subsystems.
    pub async fn shutdown(&mut self) {
        self.card_reader.disarm().await;
        self.capture.disarm().await;
    }

    /// Run the control loop until `shutdown` is cancelled or the control
    /// subscription closes, then disarm everything.
    pub async fn run(
        mut self,
        mut control: Subscription,
        mut faults: FaultReceiver,
        shutdown: CancellationToken,
    ) {
        info!(filter = %control.filter(), "session controller listening");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(report) = faults.recv() => {
                    self.handle_fault(report).await;
                }
                publication = control.recv() => match publication {
                    Some(publication) => {
                        let action = ControlAction::decode(&publication.payload);
                        debug!(topic = %publication.topic, %action, "control message");
                        self.apply(action).await;
                    }
                    None => {
                        warn!("control subscription closed");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
        info!("session controller stopped");
    }

    async fn converge(&mut self, state: SessionState) {
        match armed_subsystem(state) {
            Some(Subsystem::CardReader) => {
                self.capture.disarm().await;
                self.card_reader.arm();
            }
            Some(Subsystem::Capture) => {
                self.card_reader.disarm().await;
                self.capture.arm();
            }
            None => {
                self.card_reader.disarm().await;
                self.capture.disarm().await;
            }
        }
    }

    fn announce(&self, transition: &SessionTransition) {
        self.state_tx.send_replace(transition.to);
        self.events.emit(KioskEvent::SessionChanged {
            from: transition.from,
            to: transition.to,
            action: transition.action(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared record of which fakes are armed, checked after every call.
    #[derive(Debug, Default)]
    struct Panel {
        card_reader: bool,
        capture: bool,
        violations: u32,
    }

    struct FakeSubsystem {
        kind: Subsystem,
        panel: Arc<Mutex<Panel>>,
        generation: u64,
    }

    impl FakeSubsystem {
        fn flag(panel: &mut Panel, kind: Subsystem) -> &mut bool {
            match kind {
                Subsystem::CardReader => &mut panel.card_reader,
                Subsystem::Capture => &mut panel.capture,
            }
        }
    }

    impl Armable for FakeSubsystem {
        fn subsystem(&self) -> Subsystem {
            self.kind
        }

        fn is_armed(&self) -> bool {
            let mut panel = self.panel.lock().unwrap();
            *Self::flag(&mut panel, self.kind)
        }

        fn generation(&self) -> u64 {
            self.generation
        }

        fn arm(&mut self) {
            let mut panel = self.panel.lock().unwrap();
            let flag = Self::flag(&mut panel, self.kind);
            if !*flag {
                *flag = true;
                self.generation += 1;
            }
            if panel.card_reader && panel.capture {
                panel.violations += 1;
            }
        }

        async fn disarm(&mut self) {
            tokio::task::yield_now().await;
            *Self::flag(&mut self.panel.lock().unwrap(), self.kind) = false;
        }
    }

    fn controller() -> (SessionController<FakeSubsystem, FakeSubsystem>, Arc<Mutex<Panel>>) {
        let panel = Arc::new(Mutex::new(Panel::default()));
        let card_reader = FakeSubsystem {
            kind: Subsystem::CardReader,
            panel: Arc::clone(&panel),
            generation: 0,
        };
        let capture = FakeSubsystem {
            kind: Subsystem::Capture,
            panel: Arc::clone(&panel),
            generation: 0,
        };
        (
            SessionController::new(card_reader, capture, EventBus::new()),
            panel,
        )
    }

    #[tokio::test]
    async fn test_switching_sessions_arms_one_subsystem() {
        let (mut controller, panel) = controller();

        controller.apply(ControlAction::StartCheckIn).await;
        assert!(controller.card_reader().is_armed());
        assert!(!controller.capture().is_armed());

        controller.apply(ControlAction::StartCheckOut).await;
        assert!(!controller.card_reader().is_armed());
        assert!(controller.capture().is_armed());

        controller.apply(ControlAction::EndCheckOut).await;
        assert!(!controller.card_reader().is_armed());
        assert!(!controller.capture().is_armed());
        assert_eq!(controller.state(), SessionState::Ended);
        assert_eq!(panel.lock().unwrap().violations, 0);
    }

    #[tokio::test]
    async fn test_rearming_is_a_no_op() {
        let (mut controller, _panel) = controller();
        controller.apply(ControlAction::StartCheckIn).await;
        controller.apply(ControlAction::StartCheckIn).await;
        assert_eq!(controller.card_reader().generation(), 1);
    }

    #[tokio::test]
    async fn test_unknown_disarms_everything() {
        let (mut controller, _panel) = controller();
        controller.apply(ControlAction::StartCheckOut).await;

        let transition = controller.apply(ControlAction::Unknown).await;
        assert_eq!(transition.to, SessionState::Idle);
        assert!(!controller.capture().is_armed());
    }

    #[tokio::test]
    async fn test_fault_returns_to_idle_and_emits() {
        let (mut controller, _panel) = controller();
        let mut events = controller.events.subscribe();
        controller.apply(ControlAction::StartCheckOut).await;
        events.try_recv();

        let transition = controller
            .handle_fault(FaultReport {
                subsystem: Subsystem::Capture,
                generation: 1,
                reason: "camera gone".into(),
            })
            .await
            .unwrap();

        assert_eq!(transition.to, SessionState::Idle);
        assert!(!controller.capture().is_armed());
        assert_eq!(
            events.try_recv(),
            Some(KioskEvent::Fault {
                subsystem: Subsystem::Capture,
                reason: "camera gone".into()
            })
        );
        assert_eq!(
            events.try_recv(),
            Some(KioskEvent::SessionChanged {
                from: SessionState::CheckOutArmed,
                to: SessionState::Idle,
                action: None
            })
        );
    }

    #[tokio::test]
    async fn test_stale_fault_is_ignored() {
        let (mut controller, _panel) = controller();
        controller.apply(ControlAction::StartCheckOut).await;
        controller.apply(ControlAction::EndCheckOut).await;

        let outcome = controller
            .handle_fault(FaultReport {
                subsystem: Subsystem::Capture,
                generation: 1,
                reason: "late".into(),
            })
            .await;
        assert!(outcome.is_none());
        assert_eq!(controller.state(), SessionState::Ended);
    }

    #[tokio::test]
    async fn test_state_watch_follows_transitions() {
        let (mut controller, _panel) = controller();
        let state = controller.watch_state();
        controller.apply(ControlAction::StartCheckIn).await;
        assert_eq!(*state.borrow(), SessionState::CheckInArmed);
    }
}
