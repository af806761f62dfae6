//! Extruder collaborator: the pressure-advance/jerk model that the
//! planner consults when a move both travels in XY and extrudes.
//!
//! The extruder is an external collaborator the planner calls into, not
//! something this crate fully models on its own. [`DummyExtruder`] is the
//! pass-through reference implementation used by tests and the demo
//! binary: it imposes no extra junction constraint and never fails a move.

use crate::error::MotionError;
use crate::move_plan::Move;

pub trait ExtruderCollaborator: std::fmt::Debug {
    /// Extra velocity-squared ceiling the extruder imposes on the corner
    /// between `prev` and `cur` (e.g. to bound the instantaneous flow-rate
    /// change). Returning `f64::INFINITY` imposes no extra constraint.
    fn calc_junction(&self, prev: &Move, cur: &Move) -> f64;

    /// Validates an about-to-be-queued move (e.g. rejects excessive
    /// extrusion-to-travel ratio). Mirrors the kinematics' `check_move`.
    fn check_move(&mut self, mv: &Move) -> Result<(), MotionError>;

    /// Schedules the extrude axis's motion for `mv`, starting at `print_time`.
    fn move_(&mut self, print_time: f64, mv: &Move) -> Result<(), MotionError>;

    /// Disables the extruder's heater/motor bookkeeping at `print_time`.
    fn motor_off(&mut self, print_time: f64);

    /// Shrinks (never grows) the planner's proposed flush commit count.
    /// `queue` is the full remaining look-ahead buffer; `flush_count` is
    /// how many moves from its head the backward/forward pass is ready to
    /// commit. Extruders with their own look-ahead requirement (pressure
    /// advance needing a future move to resolve a flow-rate transition)
    /// can hold back further moves by returning a smaller count.
    fn lookahead(&mut self, queue: &[Move], flush_count: usize, lazy: bool) -> usize;
}

/// Pass-through extruder: no extra junction limit, accepts every move.
#[derive(Debug, Default)]
pub struct DummyExtruder;

impl ExtruderCollaborator for DummyExtruder {
    fn calc_junction(&self, _prev: &Move, _cur: &Move) -> f64 {
        f64::INFINITY
    }

    fn check_move(&mut self, _mv: &Move) -> Result<(), MotionError> {
        Ok(())
    }

    fn move_(&mut self, _print_time: f64, _mv: &Move) -> Result<(), MotionError> {
        Ok(())
    }

    fn motor_off(&mut self, _print_time: f64) {}

    fn lookahead(&mut self, _queue: &[Move], flush_count: usize, _lazy: bool) -> usize {
        flush_count
    }
}

/// Linear-advance extruder: imposes a junction cap derived from the ratio
/// between the extrude delta and the move's travel distance, approximating
/// the flow-rate-change limit a real pressure-advance model would enforce.
#[derive(Debug)]
pub struct LinearAdvanceExtruder {
    pub max_e_velocity: f64,
    pub pressure_advance: f64,
}

impl LinearAdvanceExtruder {
    pub fn new(max_e_velocity: f64, pressure_advance: f64) -> Self {
        LinearAdvanceExtruder {
            max_e_velocity,
            pressure_advance,
        }
    }
}

impl ExtruderCollaborator for LinearAdvanceExtruder {
    fn calc_junction(&self, prev: &Move, cur: &Move) -> f64 {
        let prev_e = prev.axes_d[3];
        let cur_e = cur.axes_d[3];
        if prev_e == 0.0 || cur_e == 0.0 || prev.move_d == 0.0 || cur.move_d == 0.0 {
            return f64::INFINITY;
        }
        let prev_ratio = prev_e / prev.move_d;
        let cur_ratio = cur_e / cur.move_d;
        if (prev_ratio - cur_ratio).abs() < 1e-9 {
            return f64::INFINITY;
        }
        let e_v2 = self.max_e_velocity * self.max_e_velocity;
        e_v2 / (prev_ratio - cur_ratio).powi(2).max(1e-9)
    }

    fn check_move(&mut self, mv: &Move) -> Result<(), MotionError> {
        if mv.move_d > 0.0 {
            let e_rate = mv.axes_d[3].abs() / mv.move_d * mv.max_cruise_v2.sqrt();
            if e_rate > self.max_e_velocity * 4.0 {
                return Err(MotionError::BeyondLimit {
                    axis: crate::move_plan::Axis::E,
                    position: e_rate,
                });
            }
        }
        Ok(())
    }

    fn move_(&mut self, _print_time: f64, _mv: &Move) -> Result<(), MotionError> {
        Ok(())
    }

    fn motor_off(&mut self, _print_time: f64) {}

    /// Holds back the tail move of a lazy flush when it still extrudes and
    /// no further move has arrived yet to bound its pressure-advance ramp.
    fn lookahead(&mut self, queue: &[Move], flush_count: usize, lazy: bool) -> usize {
        if !lazy || flush_count == 0 || flush_count < queue.len() {
            return flush_count;
        }
        if queue[flush_count - 1].axes_d[3] != 0.0 {
            flush_count - 1
        } else {
            flush_count
        }
    }
}
