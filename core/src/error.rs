use thiserror::Error;

use crate::move_plan::Axis;

/// Error taxonomy for the motion core, grouped into four categories:
/// move validation, homing, internal step-queue, and MCU communication.
///
/// Categories 1 and 2 are recoverable by the G-code layer (re-home, retry).
/// Categories 3 and 4 are fatal: the caller must route them through
/// `ToolHead::force_shutdown` and refuse further moves.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("must home axis {axis:?} first")]
    MustHomeAxisFirst { axis: Axis },

    #[error("move on axis {axis:?} to {position:.3} is beyond limit")]
    BeyondLimit { axis: Axis, position: f64 },

    #[error("endstop {endstop} did not trigger before timeout")]
    HomingTimeout { endstop: String },

    #[error("mcu reported shutdown while homing {endstop}")]
    McuShutdownDuringHome { endstop: String },

    #[error("step queue ordering violation on stepper {stepper}")]
    StepQueueOrdering { stepper: String },

    #[error("mcu communication error: {0}")]
    McuCommunication(String),
}

impl MotionError {
    /// Categories 3 and 4: the host must transition to the terminal
    /// shutdown state and stop accepting new moves.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MotionError::StepQueueOrdering { .. } | MotionError::McuCommunication(_)
        )
    }
}

pub type MotionResult<T> = Result<T, MotionError>;
