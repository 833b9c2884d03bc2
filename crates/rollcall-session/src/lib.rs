//! Attendance session orchestration.
//!
//! This crate turns remotely published session commands into armed capture
//! subsystems, and captured identities into correlated submissions:
//!
//! - [`StateMachine`]: session state and its transition history.
//! - [`SessionController`]: the single loop applying control actions and
//!   fault reports, arming at most one subsystem at a time.
//! - [`CardReaderLoop`]: card polling for check-in.
//! - [`CapturePipeline`]: camera capture, debounced classification and
//!   the bounded display queue for check-out.
//! - [`SubmissionGateway`]: request/response submissions with per-subject
//!   in-flight reservation.
//! - [`AttendanceOrchestrator`]: wires everything and exposes the event and
//!   display-frame streams.

pub mod capture;
pub mod card_reader;
pub mod controller;
pub mod display;
pub mod error;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod state_machine;
mod worker;

pub use capture::CapturePipeline;
pub use card_reader::CardReaderLoop;
pub use controller::{Armable, SessionController};
pub use display::{DisplayFrame, DisplayFrames, DisplayQueue, display_queue};
pub use error::{Result, SessionError};
pub use events::{EventBus, FaultReport, KioskEvent, KioskEvents, Subsystem};
pub use gateway::{InFlightGuard, SubmissionGateway};
pub use orchestrator::AttendanceOrchestrator;
pub use state_machine::{SessionTransition, StateMachine, TransitionCause};
