//! Look-ahead move queue: buffers planned moves, resolves their trapezoidal
//! velocity profiles with a backward/forward pass, then hands each one to
//! the kinematics and extruder collaborators in order.
//!
//! Grounded on `klippy/toolhead.py`'s `MoveQueue.flush`: the backward pass
//! tracks two independent profiles per move -- the true `max_start_v2`/
//! `delta_v2` chain used for the move's actual entry/cruise/exit speeds,
//! and a deliberately more conservative `max_smoothed_v2`/`smooth_delta_v2`
//! chain used only to find a safe point to commit a lazy flush (a "peak
//! cruise" the queue can be sure later moves won't ask it to lower).

use crate::error::MotionError;
use crate::extruder::ExtruderCollaborator;
use crate::move_plan::Move;
use crate::toolhead::PlannerState;

/// Time budget (seconds of `min_move_t`) the queue lets accumulate before
/// forcing a lazy flush on its own, independent of the MCU's buffer
/// occupancy (`ToolHead`'s separate buffer-time-driven flush policy).
const LOOKAHEAD_FLUSH_TIME: f64 = 0.250;

#[derive(Debug)]
pub struct MoveQueue {
    moves: Vec<Move>,
    junction_deviation: f64,
    junction_flush: f64,
}

impl MoveQueue {
    pub fn new(junction_deviation: f64) -> Self {
        MoveQueue {
            moves: Vec::new(),
            junction_deviation,
            junction_flush: LOOKAHEAD_FLUSH_TIME,
        }
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Appends `mv` to the tail of the queue, computing its junction
    /// velocity ceiling against the previous queued move (if any).
    ///
    /// Returns `true` once the accumulated look-ahead time budget is spent,
    /// signaling the caller should force a lazy flush now.
    pub fn add_move(&mut self, mut mv: Move, extruder: &dyn ExtruderCollaborator) -> bool {
        if let Some(prev) = self.moves.last().copied() {
            mv.calc_junction(&prev, self.junction_deviation, extruder);
        }
        self.junction_flush -= mv.min_move_t;
        self.moves.push(mv);
        self.junction_flush <= 0.0
    }

    /// Resolves and executes queued moves.
    ///
    /// `lazy = true` (the steady-state case, called whenever the MCU buffer
    /// runs low or the look-ahead time budget expires): only moves up to
    /// the first identified cruise peak are committed, since a future move
    /// may still lower the entry speed of anything after it.
    ///
    /// `lazy = false` (end of print, a pause, or any event forcing a full
    /// flush): every queued move is resolved down to a full stop.
    pub fn flush(&mut self, state: &mut PlannerState, lazy: bool) -> Result<(), MotionError> {
        self.junction_flush = LOOKAHEAD_FLUSH_TIME;
        if self.moves.is_empty() {
            return Ok(());
        }

        let mut update_flush_count = lazy;
        let mut flush_count = self.moves.len();

        let mut next_end_v2 = 0.0f64;
        let mut next_smoothed_v2 = 0.0f64;
        let mut peak_cruise_v2 = 0.0f64;
        // Moves whose junction can't be resolved yet because a later
        // decel-to-accel transition (the "peak") hasn't been found.
        let mut delayed: Vec<(usize, f64, f64)> = Vec::new();

        for i in (0..self.moves.len()).rev() {
            let (max_start_v2, delta_v2, max_smoothed_v2, smooth_delta_v2, max_cruise_v2) = {
                let mv = &self.moves[i];
                (mv.max_start_v2, mv.delta_v2, mv.max_smoothed_v2, mv.smooth_delta_v2, mv.max_cruise_v2)
            };

            let reachable_start_v2 = next_end_v2 + delta_v2;
            let start_v2 = max_start_v2.min(reachable_start_v2);
            let reachable_smoothed_v2 = next_smoothed_v2 + smooth_delta_v2;
            let smoothed_v2 = max_smoothed_v2.min(reachable_smoothed_v2);

            if smoothed_v2 < reachable_smoothed_v2 {
                // This move can still accelerate relative to the smoothed
                // chain: it is, or follows, a genuine cruise peak.
                if smoothed_v2 + smooth_delta_v2 > next_smoothed_v2 || !delayed.is_empty() {
                    if update_flush_count && peak_cruise_v2 > 0.0 {
                        flush_count = i + 1;
                        update_flush_count = false;
                    }
                    peak_cruise_v2 = max_cruise_v2.min((smoothed_v2 + reachable_smoothed_v2) * 0.5);
                    if !delayed.is_empty() {
                        if !update_flush_count && i < flush_count {
                            let mut mc_v2 = peak_cruise_v2;
                            for &(j, ms_v2, me_v2) in delayed.iter().rev() {
                                mc_v2 = mc_v2.min(ms_v2);
                                self.moves[j].set_junction(ms_v2.min(mc_v2), mc_v2, me_v2.min(mc_v2));
                            }
                        }
                        delayed.clear();
                    }
                }
                if !update_flush_count && i < flush_count {
                    let cruise_v2 = ((start_v2 + reachable_start_v2) * 0.5)
                        .min(max_cruise_v2)
                        .min(peak_cruise_v2);
                    self.moves[i].set_junction(start_v2.min(cruise_v2), cruise_v2, next_end_v2.min(cruise_v2));
                }
            } else {
                // Still decelerating relative to the smoothed chain: defer
                // until the peak behind it is known.
                delayed.push((i, start_v2, next_end_v2));
            }

            next_end_v2 = start_v2;
            next_smoothed_v2 = smoothed_v2;
        }

        if update_flush_count || flush_count == 0 {
            return Ok(());
        }

        flush_count = state.extruder.lookahead(&self.moves, flush_count, lazy).min(flush_count);
        if flush_count == 0 {
            return Ok(());
        }

        for mv in &self.moves[0..flush_count] {
            mv.execute(state)?;
        }
        self.moves.drain(0..flush_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extruder::DummyExtruder;
    use crate::kinematics::cartesian::CartesianKinematics;
    use crate::kinematics::{AxisLimits, DrivenStepper, KinematicsKind};
    use crate::mcu::SimulatedMcu;
    use crate::step_queue::RecordingStepQueue;
    use crate::stepper::StepperAxis;
    use crate::toolhead::PrintClock;
    use glam::DVec4;

    fn state() -> PlannerState {
        let limits = AxisLimits::new([(0.0, 300.0), (0.0, 300.0), (0.0, 300.0)], 300.0, 3000.0, 300.0, 3000.0);
        let mut k = CartesianKinematics::new(
            DrivenStepper::new(StepperAxis::new("x", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("x"))),
            DrivenStepper::new(StepperAxis::new("y", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("y"))),
            DrivenStepper::new(StepperAxis::new("z", 0.0025, 16_000_000.0), Box::new(RecordingStepQueue::new("z"))),
            limits,
        );
        k.limits_mut().mark_homed(0);
        k.limits_mut().mark_homed(1);
        k.limits_mut().mark_homed(2);
        PlannerState {
            kinematics: KinematicsKind::Cartesian(k),
            extruder: Box::new(DummyExtruder),
            mcu: Box::new(SimulatedMcu::new()),
            clock: PrintClock::new(),
        }
    }

    #[test]
    fn full_flush_drains_the_whole_queue() {
        let mut q = MoveQueue::new(0.02);
        let extruder = DummyExtruder;
        q.add_move(
            Move::new(DVec4::new(0.0, 0.0, 0.0, 0.0), DVec4::new(10.0, 0.0, 0.0, 0.0), 100.0, 1000.0, 500.0),
            &extruder,
        );
        q.add_move(
            Move::new(DVec4::new(10.0, 0.0, 0.0, 0.0), DVec4::new(10.0, 10.0, 0.0, 0.0), 100.0, 1000.0, 500.0),
            &extruder,
        );
        let mut st = state();
        q.flush(&mut st, false).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn lazy_flush_holds_back_the_last_move() {
        let mut q = MoveQueue::new(0.02);
        let extruder = DummyExtruder;
        q.add_move(
            Move::new(DVec4::new(0.0, 0.0, 0.0, 0.0), DVec4::new(10.0, 0.0, 0.0, 0.0), 100.0, 1000.0, 500.0),
            &extruder,
        );
        q.add_move(
            Move::new(DVec4::new(10.0, 0.0, 0.0, 0.0), DVec4::new(20.0, 0.0, 0.0, 0.0), 100.0, 1000.0, 500.0),
            &extruder,
        );
        let mut st = state();
        q.flush(&mut st, true).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn lazy_flush_commits_only_up_to_the_cruise_peak() {
        // Three collinear moves of increasing-then-decreasing junction
        // speed: a short accel move, a long cruise move, a short decel
        // move. The short trailing move never reaches the smoothed chain's
        // peak, so it (and only it) should stay queued after a lazy flush.
        let mut q = MoveQueue::new(0.02);
        let extruder = DummyExtruder;
        q.add_move(Move::new(DVec4::new(0.0, 0.0, 0.0, 0.0), DVec4::new(50.0, 0.0, 0.0, 0.0), 100.0, 1000.0, 500.0), &extruder);
        q.add_move(Move::new(DVec4::new(50.0, 0.0, 0.0, 0.0), DVec4::new(100.0, 0.0, 0.0, 0.0), 100.0, 1000.0, 500.0), &extruder);
        q.add_move(Move::new(DVec4::new(100.0, 0.0, 0.0, 0.0), DVec4::new(102.0, 0.0, 0.0, 0.0), 100.0, 1000.0, 500.0), &extruder);
        let mut st = state();
        q.flush(&mut st, true).unwrap();
        assert!(q.len() >= 1);
        assert!(q.len() < 3);
    }

    proptest::proptest! {
        /// A full flush of any chain of forward-only X moves always drains
        /// the queue and never asks the kinematics layer to execute a move
        /// it rejects (invariant: start/cruise/end velocities stay within
        /// what `max_cruise_v2`/`delta_v2` allow by construction).
        #[test]
        fn full_flush_always_drains_arbitrary_move_chains(
            lengths in proptest::collection::vec(1.0f64..50.0, 1..8),
            speed in 10.0f64..200.0,
        ) {
            let mut q = MoveQueue::new(0.02);
            let extruder = DummyExtruder;
            let mut x = 0.0;
            for len in &lengths {
                let start = DVec4::new(x, 0.0, 0.0, 0.0);
                x += len;
                let end = DVec4::new(x, 0.0, 0.0, 0.0);
                q.add_move(Move::new(start, end, speed, 1000.0, 500.0), &extruder);
            }
            let mut st = state();
            q.flush(&mut st, false).unwrap();
            proptest::prop_assert!(q.is_empty());
        }
    }
}
