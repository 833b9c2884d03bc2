//! Session state machine.
//!
//! Every control action is accepted from every state; the action alone
//! decides the next state:
//!
//! | Action | Next state | Armed subsystem |
//! |---|---|---|
//! | `start-check-in` | `CheckInArmed` | card reader |
//! | `start-check-out` | `CheckOutArmed` | capture pipeline |
//! | `end-check-in`, `end-check-out` | `Ended` | none |
//! | unknown | `Idle` | none |
//!
//! A subsystem fault moves the machine to `Idle` as well.
//!
//! The machine only tracks state. Arming and disarming is carried out by the
//! [`SessionController`](crate::controller::SessionController).
//!
//! # Examples
//!
//! ```
//! use rollcall_core::{ControlAction, SessionState};
//! use rollcall_session::StateMachine;
//!
//! let mut machine = StateMachine::new();
//! let transition = machine.on_control(ControlAction::StartCheckIn);
//! assert_eq!(transition.from, SessionState::Idle);
//! assert_eq!(transition.to, SessionState::CheckInArmed);
//! assert_eq!(machine.history().len(), 1);
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rollcall_core::{ControlAction, SessionState};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::Subsystem;

/// Maximum number of state transitions to keep in history.
pub const MAX_HISTORY_SIZE: usize = 100;

/// State a control action leads to.
pub fn target_state(action: ControlAction) -> SessionState {
    match action {
        ControlAction::StartCheckIn => SessionState::CheckInArmed,
        ControlAction::StartCheckOut => SessionState::CheckOutArmed,
        ControlAction::EndCheckIn | ControlAction::EndCheckOut => SessionState::Ended,
        ControlAction::Unknown => SessionState::Idle,
    }
}

/// Subsystem that must be armed in `state`, if any.
pub fn armed_subsystem(state: SessionState) -> Option<Subsystem> {
    match state {
        SessionState::CheckInArmed => Some(Subsystem::CardReader),
        SessionState::CheckOutArmed => Some(Subsystem::Capture),
        SessionState::Idle | SessionState::Ended => None,
    }
}

/// What caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Control(ControlAction),
    Fault { subsystem: Subsystem, reason: String },
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub cause: TransitionCause,
    pub timestamp: DateTime<Utc>,
}

impl SessionTransition {
    fn new(from: SessionState, to: SessionState, cause: TransitionCause) -> Self {
        Self {
            from,
            to,
            cause,
            timestamp: Utc::now(),
        }
    }

    /// Control action that triggered this transition, if any.
    pub fn action(&self) -> Option<ControlAction> {
        match self.cause {
            TransitionCause::Control(action) => Some(action),
            TransitionCause::Fault { .. } => None,
        }
    }
}

/// Session state with a bounded transition history.
///
/// Not thread-safe; it is owned by the single control loop.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current_state: SessionState,
    history: VecDeque<SessionTransition>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SessionState::Idle,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.current_state
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<SessionTransition> {
        &self.history
    }

    /// Apply a control action.
    pub fn on_control(&mut self, action: ControlAction) -> SessionTransition {
        let to = target_state(action);
        if action == ControlAction::Unknown {
            warn!(from = %self.current_state, "unknown control action, returning to idle");
        } else {
            info!(from = %self.current_state, %to, %action, "session transition");
        }
        self.record(to, TransitionCause::Control(action))
    }

    /// Return to `Idle` after a subsystem fault.
    pub fn fault(&mut self, subsystem: Subsystem, reason: impl Into<String>) -> SessionTransition {
        let reason = reason.into();
        warn!(from = %self.current_state, %subsystem, %reason, "subsystem fault, returning to idle");
        self.record(SessionState::Idle, TransitionCause::Fault { subsystem, reason })
    }

    fn record(&mut self, to: SessionState, cause: TransitionCause) -> SessionTransition {
        let transition = SessionTransition::new(self.current_state, to, cause);
        self.current_state = to;

        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        transition
    }
}
