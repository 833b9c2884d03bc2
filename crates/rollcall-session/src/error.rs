use thiserror::Error;

use crate::events::Subsystem;

/// Errors raised while running an attendance session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Orchestrator already started")]
    AlreadyStarted,

    #[error("Orchestrator not running")]
    NotRunning,

    #[error("{subsystem} could not be opened after {attempts} attempts")]
    OpenFailed { subsystem: Subsystem, attempts: u32 },

    #[error("{subsystem} failed {count} times in a row")]
    TooManyErrors { subsystem: Subsystem, count: u32 },

    #[error("Control loop ended unexpectedly: {0}")]
    ControlLoop(String),

    #[error("Hardware error: {0}")]
    Hardware(#[from] rollcall_hardware::HardwareError),

    #[error("Transport error: {0}")]
    Transport(#[from] rollcall_transport::TransportError),

    #[error(transparent)]
    Core(#[from] rollcall_core::Error),
}

impl SessionError {
    pub fn open_failed(subsystem: Subsystem, attempts: u32) -> Self {
        Self::OpenFailed {
            subsystem,
            attempts,
        }
    }

    pub fn too_many_errors(subsystem: Subsystem, count: u32) -> Self {
        Self::TooManyErrors { subsystem, count }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
