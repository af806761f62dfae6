//! MCU-side collaborator: print-time synchronization and buffer occupancy.
//!
//! Real wire framing (serial transport, checksums, retransmit) is out of
//! scope for this crate; [`McuMessage`] documents only the message
//! *shapes* that the step-queue primitive assumes exist on the other end
//! of the link.

use crate::error::MotionError;

/// Message shapes used by the core (not a wire encoder/decoder).
#[derive(Debug, Clone, PartialEq)]
pub enum McuMessage {
    ConfigStepper {
        oid: u32,
        step_pin: String,
        dir_pin: String,
        min_stop_interval: u32,
        invert_step: bool,
    },
    QueueStep {
        oid: u32,
        interval: u32,
        count: u16,
        add: i16,
    },
    SetNextStepDir {
        oid: u32,
        dir: bool,
    },
    ResetStepClock {
        oid: u32,
        clock: u64,
    },
    StepperGetPosition {
        oid: u32,
    },
    StepperPosition {
        pos: i64,
    },
    ConfigEndStop {
        oid: u32,
        pin: String,
        pull_up: bool,
        stepper_count: u32,
    },
    EndStopSetStepper {
        oid: u32,
        pos: u32,
        stepper_oid: u32,
    },
    EndStopHome {
        oid: u32,
        clock: u64,
        rest_ticks: u64,
        pin_value: bool,
    },
    EndStopQuery {
        oid: u32,
    },
    EndStopState {
        homing: bool,
        pin: bool,
    },
}

/// Collaborator queried by `ToolHead`'s print-time pipeline.
pub trait McuLink {
    /// Estimated seconds of motion still buffered on the MCU at `now`,
    /// given that `print_time` worth of motion has been scheduled.
    fn get_print_buffer_time(&self, now: f64, print_time: f64) -> f64;

    /// Record that a fresh print is starting at wall-clock `now`.
    fn set_print_start_time(&mut self, now: f64);

    /// Flush (irrevocably commit) all queued step data up to `upto_time`.
    fn flush_moves(&mut self, upto_time: f64) -> Result<(), MotionError>;

    /// Emergency-stop: the MCU must halt all motion immediately.
    fn force_shutdown(&mut self);
}

/// In-memory reference `McuLink` for tests and the demo binary. Models
/// buffer occupancy as `print_time` scheduled minus wall-clock elapsed
/// since the print started, clamped to the amount actually flushed.
#[derive(Debug, Default)]
pub struct SimulatedMcu {
    print_start_time: Option<f64>,
    flushed_to: f64,
    shutdown: bool,
}

impl SimulatedMcu {
    pub fn new() -> Self {
        SimulatedMcu::default()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }
}

impl McuLink for SimulatedMcu {
    fn get_print_buffer_time(&self, now: f64, print_time: f64) -> f64 {
        let start = match self.print_start_time {
            Some(t) => t,
            None => return 0.0,
        };
        let elapsed = (now - start).max(0.0);
        (print_time - elapsed).max(0.0)
    }

    fn set_print_start_time(&mut self, now: f64) {
        self.print_start_time = Some(now);
        self.flushed_to = 0.0;
    }

    fn flush_moves(&mut self, upto_time: f64) -> Result<(), MotionError> {
        if upto_time + 1e-9 < self.flushed_to {
            return Err(MotionError::McuCommunication(
                "flush_moves called with time earlier than already flushed".into(),
            ));
        }
        self.flushed_to = upto_time;
        Ok(())
    }

    fn force_shutdown(&mut self) {
        self.shutdown = true;
    }
}
