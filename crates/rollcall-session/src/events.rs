//! Events surfaced to the presentation layer, and fault reports flowing
//! from the subsystems back to the session controller.

use std::fmt;

use rollcall_core::{AttendanceMethod, ControlAction, SessionState, SubjectId, SubmissionResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Events buffered per subscriber before the oldest are discarded.
pub const EVENT_BUFFER: usize = 256;

/// A capture subsystem the controller arms and disarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    CardReader,
    Capture,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::CardReader => write!(f, "card reader"),
            Subsystem::Capture => write!(f, "capture pipeline"),
        }
    }
}

/// Event delivered to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum KioskEvent {
    /// The session state changed. `action` is `None` when a fault caused it.
    SessionChanged {
        from: SessionState,
        to: SessionState,
        action: Option<ControlAction>,
    },

    /// A submission finished. Emitted exactly once per submission attempt.
    Submission {
        method: AttendanceMethod,
        subject: SubjectId,
        result: SubmissionResult,
    },

    /// The camera has settled and display frames are flowing.
    CaptureReady,

    /// A subsystem hit an unrecoverable error and disarmed itself.
    Fault { subsystem: Subsystem, reason: String },
}

/// Fan-out of [`KioskEvent`]s to any number of consumers.
///
/// Emitting never blocks. A consumer that falls more than [`EVENT_BUFFER`]
/// events behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KioskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Publish an event. Events with no consumer are discarded.
    pub fn emit(&self, event: KioskEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> KioskEvents {
        KioskEvents {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer's view of the event stream.
#[derive(Debug)]
pub struct KioskEvents {
    rx: broadcast::Receiver<KioskEvent>,
}

impl KioskEvents {
    /// Wait for the next event. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<KioskEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event consumer lagging, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<KioskEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Unrecoverable subsystem error, routed through the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub subsystem: Subsystem,

    /// Arm generation of the worker that failed. Reports from a worker that
    /// has since been replaced are ignored.
    pub generation: u64,

    pub reason: String,
}

pub type FaultSender = mpsc::UnboundedSender<FaultReport>;
pub type FaultReceiver = mpsc::UnboundedReceiver<FaultReport>;

pub fn fault_channel() -> (FaultSender, FaultReceiver) {
    mpsc::unbounded_channel()
}
