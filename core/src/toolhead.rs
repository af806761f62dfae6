//! `ToolHead`: the print-time state machine that ties the look-ahead queue,
//! kinematics, extruder and MCU link together.
//!
//! Grounded on `klippy/toolhead.py`'s `ToolHead` class: the Idle/Streaming
//! print-time clock, the MCU-buffer-occupancy-driven flush policy (distinct
//! from the queue's own look-ahead-time-budget flush in
//! [`super::queue`]), the stall-check loop, and the
//! `move`/`dwell`/`home`/`motor_off`/`wait_moves` surface.

use crate::error::MotionError;
use crate::extruder::ExtruderCollaborator;
use crate::homing::{Endstop, HomingSpec};
use crate::kinematics::{Kinematics, KinematicsKind};
use crate::mcu::McuLink;
use crate::move_plan::{Axis, Move, Position};
use crate::reactor::{Reactor, TimerId, NEVER};

/// Idle: no moves scheduled, print time tracks wall clock loosely.
/// Streaming: a print is underway and print time is the authoritative
/// schedule the MCU executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintTimeState {
    Idle,
    Streaming,
}

/// The print-time clock: owns the monotonically increasing `print_time`
/// and decides when accumulated moves must be flushed to the MCU.
#[derive(Debug)]
pub struct PrintClock {
    pub state: PrintTimeState,
    pub print_time: f64,
    flush_margin: f64,
}

impl PrintClock {
    pub fn new() -> Self {
        PrintClock {
            state: PrintTimeState::Idle,
            print_time: 0.0,
            flush_margin: 0.250,
        }
    }

    /// Transitions Idle -> Streaming on the first scheduled move of a run,
    /// anchoring the MCU's print-start reference to wall-clock `now`.
    pub fn enter_streaming(&mut self, now: f64, mcu: &mut dyn McuLink) {
        if self.state == PrintTimeState::Idle {
            self.state = PrintTimeState::Streaming;
            self.print_time = self.print_time.max(now);
            mcu.set_print_start_time(now);
        }
    }

    pub fn get_next_move_time(&mut self, _mcu: &mut dyn McuLink) -> f64 {
        self.print_time
    }

    /// Advances print time by a just-executed move's duration and commits
    /// (flushes) everything up to the new margin-adjusted time.
    pub fn update_move_time(&mut self, duration: f64, mcu: &mut dyn McuLink) -> Result<(), MotionError> {
        self.print_time += duration;
        mcu.flush_moves((self.print_time - self.flush_margin).max(0.0))
    }

    /// Seconds of motion still buffered on the MCU.
    pub fn buffer_time(&self, now: f64, mcu: &dyn McuLink) -> f64 {
        mcu.get_print_buffer_time(now, self.print_time)
    }

    pub fn reset_idle(&mut self) {
        self.state = PrintTimeState::Idle;
        self.print_time = 0.0;
    }
}

impl Default for PrintClock {
    fn default() -> Self {
        PrintClock::new()
    }
}

/// Bundles the collaborators a [`Move`](crate::move_plan::Move) needs at
/// execution time, so `ToolHead` can hand `&mut self.state` to
/// `self.queue.flush` without a conflicting borrow of `self.queue` itself.
pub struct PlannerState {
    pub kinematics: KinematicsKind,
    pub extruder: Box<dyn ExtruderCollaborator>,
    pub mcu: Box<dyn McuLink>,
    pub clock: PrintClock,
}

/// Soft limits governing every queued move, independent of per-axis travel
/// limits (which live on the kinematics itself).
#[derive(Debug, Clone, Copy)]
pub struct MoveLimits {
    pub max_velocity: f64,
    pub max_accel: f64,
    pub max_accel_to_decel: f64,
    pub junction_deviation: f64,
}

/// Snapshot returned by [`ToolHead::stats`].
#[derive(Debug, Clone, Copy)]
pub struct ToolHeadStats {
    pub print_time: f64,
    pub queued_moves: usize,
    pub buffer_time: f64,
}

/// Reschedule step used by the flush timer when it fires early relative to
/// the buffer-occupancy thresholds (mirrors a real background reactor
/// callback's "come back soon and check again" behavior).
const BGFLUSH_LOW_TIME: f64 = 0.200;

pub struct ToolHead {
    queue: super::queue::MoveQueue,
    state: PlannerState,
    reactor: Box<dyn Reactor>,
    limits: MoveLimits,
    position: Position,
    motor_off_timer: TimerId,
    flush_timer: TimerId,
    idle_timeout: f64,
    buffer_time_low: f64,
    buffer_time_high: f64,
    buffer_time_start: f64,
    need_check_stall: f64,
    print_stall: u32,
    synch_print_time: bool,
    shutdown: bool,
}

impl ToolHead {
    pub fn new(
        kinematics: KinematicsKind,
        extruder: Box<dyn ExtruderCollaborator>,
        mcu: Box<dyn McuLink>,
        mut reactor: Box<dyn Reactor>,
        limits: MoveLimits,
    ) -> Self {
        let flush_timer = reactor.register_timer();
        let motor_off_timer = reactor.register_timer();
        ToolHead {
            queue: super::queue::MoveQueue::new(limits.junction_deviation),
            state: PlannerState {
                kinematics,
                extruder,
                mcu,
                clock: PrintClock::new(),
            },
            reactor,
            limits,
            position: Position::ZERO,
            motor_off_timer,
            flush_timer,
            idle_timeout: 600.0,
            buffer_time_low: 1.0,
            buffer_time_high: 2.0,
            buffer_time_start: 0.250,
            need_check_stall: 0.0,
            print_stall: 0,
            synch_print_time: false,
            shutdown: false,
        }
    }

    pub fn get_position(&self) -> Position {
        self.position
    }

    pub fn get_last_move_time(&self) -> f64 {
        self.state.clock.print_time
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn print_stall(&self) -> u32 {
        self.print_stall
    }

    /// Overrides the host's notion of position without commanding motion
    /// (G-code `G92` / `SET_POSITION`). Marks the touched axes homed.
    pub fn set_position(&mut self, pos: Position, homing_axes: &[Axis]) {
        self.position = pos;
        self.state.kinematics.set_position([pos.x, pos.y, pos.z]);
        for axis in homing_axes {
            if let Some(idx) = xyz_index(*axis) {
                self.state.kinematics.limits_mut().mark_homed(idx);
            }
        }
    }

    pub fn reset_position(&mut self, homing_axes: &[Axis]) {
        let zero = self.position;
        self.set_position(zero, homing_axes);
    }

    /// Queues a linear move to `end`, validating travel limits and the
    /// homed-axis invariant (via the kinematics' unified `check_move`)
    /// before admission.
    pub fn move_(&mut self, end: Position, speed: f64) -> Result<(), MotionError> {
        if self.shutdown {
            return Err(MotionError::McuCommunication("toolhead is shut down".into()));
        }

        let capped_speed = speed.min(self.limits.max_velocity);
        let mut mv = Move::new(self.position, end, capped_speed, self.limits.max_accel, self.limits.max_accel_to_decel);
        self.state.kinematics.check_move(&mut mv)?;
        self.state.extruder.check_move(&mv)?;

        self.position = end;
        let lookahead_due = self.queue.add_move(mv, self.state.extruder.as_ref());

        let now = self.reactor.monotonic();
        self.state.clock.enter_streaming(now, self.state.mcu.as_mut());
        self.synch_print_time = true;

        if lookahead_due {
            tracing::trace!(queued = self.queue.len(), "look-ahead time budget spent, lazy-flushing queue");
            self.queue.flush(&mut self.state, true)?;
        }
        self.schedule_flush_timer(now);
        self.reactor.update_timer(self.motor_off_timer, NEVER);
        Ok(())
    }

    /// Pauses the toolhead (a print-time dwell, G-code `G4`); flushes the
    /// queue first so the pause lands after all prior motion.
    pub fn dwell(&mut self, seconds: f64) -> Result<(), MotionError> {
        self.wait_moves()?;
        self.state.clock.print_time += seconds;
        Ok(())
    }

    /// Forces every queued move to resolve to a full stop and executes
    /// them (the "full flush" half of the buffer-occupancy flush policy).
    pub fn wait_moves(&mut self) -> Result<(), MotionError> {
        self.queue.flush(&mut self.state, false)?;
        self.check_stall()
    }

    /// Runs the homing protocol for `spec.axis`, delegating the per-axis
    /// approach/retract/reconcile sequence to the kinematics layer (CoreXY
    /// reconciles both belt steppers together; Cartesian reconciles one).
    pub fn home(&mut self, spec: &HomingSpec, endstop: &mut dyn Endstop) -> Result<(), MotionError> {
        self.wait_moves()?;
        let idx = spec.axis.index();
        let homed_pos = match self.state.kinematics.home(spec, endstop) {
            Ok(pos) => pos,
            Err(err) => {
                tracing::warn!(axis = ?spec.axis, %err, "homing failed");
                return Err(err);
            }
        };
        self.position[idx] = homed_pos;
        tracing::debug!(axis = ?spec.axis, position = homed_pos, "axis homed");
        Ok(())
    }

    /// Disables the kinematics' steppers (resetting every axis's unhomed
    /// sentinel, invariant 4) and the extruder, and arms the idle-power
    /// timer fresh so a subsequent `poll_motor_off_timer` is a no-op until
    /// `idle_timeout` elapses again.
    pub fn motor_off(&mut self) -> Result<(), MotionError> {
        self.wait_moves()?;
        let print_time = self.state.clock.print_time;
        self.state.kinematics.motor_off();
        self.state.extruder.motor_off(print_time);
        let now = self.reactor.monotonic();
        self.reactor.update_timer(self.motor_off_timer, now + self.idle_timeout);
        self.reactor.update_timer(self.flush_timer, NEVER);
        Ok(())
    }

    pub fn force_shutdown(&mut self) {
        tracing::error!(print_time = self.state.clock.print_time, "forcing toolhead shutdown");
        self.shutdown = true;
        self.state.mcu.force_shutdown();
    }

    pub fn stats(&self) -> ToolHeadStats {
        let now = self.reactor.monotonic();
        ToolHeadStats {
            print_time: self.state.clock.print_time,
            queued_moves: self.queue.len(),
            buffer_time: self.state.clock.buffer_time(now, self.state.mcu.as_ref()),
        }
    }

    pub fn idle_timeout(&self) -> f64 {
        self.idle_timeout
    }

    /// Overrides the runtime acceleration ceiling (G-code `M204`), clamped
    /// to the configured max-accel-to-decel ratio.
    pub fn set_max_accel(&mut self, accel: f64) {
        self.limits.max_accel = accel;
        self.limits.max_accel_to_decel = self.limits.max_accel_to_decel.min(accel);
        self.state.kinematics.set_max_jerk(self.limits.max_accel_to_decel);
    }

    /// The next due timer, if any (either the flush or the motor-off
    /// timer). A host run loop should sleep until this, then call whichever
    /// poll method owns the returned [`TimerId`].
    pub fn next_timer(&self) -> Option<(TimerId, f64)> {
        self.reactor.next_timer()
    }

    pub fn flush_timer_id(&self) -> TimerId {
        self.flush_timer
    }

    pub fn motor_off_timer_id(&self) -> TimerId {
        self.motor_off_timer
    }

    /// Background-flush timer callback: lazily flushes the queue whenever
    /// buffered motion drops to `buffer_time_low`, and forces a full flush
    /// (ending the print-time stream) once it drops to zero. Returns the
    /// next time this timer should be called again.
    pub fn poll_flush_timer(&mut self) -> Result<f64, MotionError> {
        if !self.synch_print_time || self.state.clock.state != PrintTimeState::Streaming {
            return Ok(NEVER);
        }
        let now = self.reactor.monotonic();
        let buffer_time = self.state.clock.buffer_time(now, self.state.mcu.as_ref());
        if buffer_time > self.buffer_time_low {
            return Ok(now + (buffer_time - self.buffer_time_low).min(BGFLUSH_LOW_TIME));
        }
        self.queue.flush(&mut self.state, true)?;
        let buffer_time = self.state.clock.buffer_time(now, self.state.mcu.as_ref());
        if buffer_time <= 0.0 {
            self.state.clock.reset_idle();
            self.synch_print_time = false;
            return Ok(NEVER);
        }
        Ok(now + BGFLUSH_LOW_TIME)
    }

    /// Idle-power timer callback: powers down the steppers once
    /// `idle_timeout` has elapsed with the queue empty.
    pub fn poll_motor_off_timer(&mut self) -> f64 {
        if !self.queue.is_empty() {
            return self.reactor.monotonic() + self.idle_timeout;
        }
        if let Err(err) = self.motor_off() {
            tracing::warn!(%err, "idle motor-off failed");
        }
        NEVER
    }

    fn schedule_flush_timer(&mut self, now: f64) {
        let buffer_time = self.state.clock.buffer_time(now, self.state.mcu.as_ref());
        let due = if buffer_time > self.buffer_time_high {
            now + (buffer_time - self.buffer_time_high)
        } else {
            now
        };
        self.reactor.update_timer(self.flush_timer, due);
    }

    /// Detects a stalled print: buffered motion has run dry while moves are
    /// still expected, i.e. the MCU is waiting on us faster than we can
    /// plan. Mirrors `toolhead.py`'s `check_stall`.
    fn check_stall(&mut self) -> Result<(), MotionError> {
        if self.state.clock.state != PrintTimeState::Streaming {
            self.need_check_stall = 0.0;
            return Ok(());
        }
        let now = self.reactor.monotonic();
        if self.need_check_stall > 0.0 && now >= self.need_check_stall {
            let buffer_time = self.state.clock.buffer_time(now, self.state.mcu.as_ref());
            if buffer_time < self.buffer_time_start {
                self.print_stall += 1;
            }
            self.need_check_stall = 0.0;
        }
        Ok(())
    }
}

fn xyz_index(axis: Axis) -> Option<usize> {
    match axis {
        Axis::X => Some(0),
        Axis::Y => Some(1),
        Axis::Z => Some(2),
        Axis::E => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extruder::DummyExtruder;
    use crate::homing::FixedEndstop;
    use crate::kinematics::cartesian::CartesianKinematics;
    use crate::kinematics::{AxisLimits, DrivenStepper};
    use crate::mcu::SimulatedMcu;
    use crate::reactor::ManualReactor;
    use crate::step_queue::RecordingStepQueue;
    use crate::stepper::StepperAxis;

    fn make_toolhead() -> ToolHead {
        let axis_limits = AxisLimits::new([(0.0, 300.0), (0.0, 300.0), (0.0, 300.0)], 300.0, 3000.0, 300.0, 3000.0);
        let k = CartesianKinematics::new(
            DrivenStepper::new(StepperAxis::new("x", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("x"))),
            DrivenStepper::new(StepperAxis::new("y", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("y"))),
            DrivenStepper::new(StepperAxis::new("z", 0.0025, 16_000_000.0), Box::new(RecordingStepQueue::new("z"))),
            axis_limits,
        );
        let limits = MoveLimits {
            max_velocity: 150.0,
            max_accel: 1500.0,
            max_accel_to_decel: 750.0,
            junction_deviation: 0.02,
        };
        ToolHead::new(
            KinematicsKind::Cartesian(k),
            Box::new(DummyExtruder),
            Box::new(SimulatedMcu::new()),
            Box::new(ManualReactor::new()),
            limits,
        )
    }

    #[test]
    fn unhomed_move_is_rejected() {
        let mut th = make_toolhead();
        let err = th.move_(Position::new(10.0, 0.0, 0.0, 0.0), 100.0).unwrap_err();
        assert!(matches!(err, MotionError::MustHomeAxisFirst { .. }));
    }

    #[test]
    fn homed_move_advances_print_time_after_wait() {
        let mut th = make_toolhead();
        th.set_position(Position::ZERO, &Axis::XYZ);
        th.move_(Position::new(10.0, 0.0, 0.0, 0.0), 100.0).unwrap();
        th.wait_moves().unwrap();
        assert!(th.get_last_move_time() > 0.0);
    }

    #[test]
    fn force_shutdown_blocks_further_moves() {
        let mut th = make_toolhead();
        th.set_position(Position::ZERO, &Axis::XYZ);
        th.force_shutdown();
        let err = th.move_(Position::new(5.0, 0.0, 0.0, 0.0), 50.0).unwrap_err();
        assert!(err.is_fatal() || matches!(err, MotionError::McuCommunication(_)));
    }

    #[test]
    fn motor_off_resets_the_unhomed_sentinel() {
        let mut th = make_toolhead();
        th.set_position(Position::ZERO, &Axis::XYZ);
        th.move_(Position::new(10.0, 0.0, 0.0, 0.0), 100.0).unwrap();
        th.motor_off().unwrap();
        let err = th.move_(Position::new(20.0, 0.0, 0.0, 0.0), 100.0).unwrap_err();
        assert!(matches!(err, MotionError::MustHomeAxisFirst { .. }));
    }

    #[test]
    fn home_delegates_to_kinematics_and_records_position() {
        let mut th = make_toolhead();
        let spec = HomingSpec {
            axis: Axis::X,
            position_endstop: 0.0,
            position_min: -10.0,
            position_max: 300.0,
            approach_speed: 50.0,
            retract_dist: 5.0,
            second_homing_speed: 10.0,
        };
        let mut endstop = FixedEndstop { trigger_at: 0.0 };
        th.home(&spec, &mut endstop).unwrap();
        assert_eq!(th.get_position().x, 0.0);
        th.move_(Position::new(10.0, 0.0, 0.0, 0.0), 50.0).unwrap();
    }

    #[test]
    fn poll_motor_off_timer_fires_once_the_queue_is_idle() {
        let mut th = make_toolhead();
        assert_eq!(th.poll_motor_off_timer(), NEVER);
    }
}
