//! CoreXY kinematics: two belt-coupled steppers drive X and Y jointly, Z is
//! independent. Grounded on `klippy/corexy.py`: stepper `a` tracks `x + y`,
//! stepper `b` tracks `x - y`. Both `a` and `b` move for any X or Y motion,
//! so homing or power-enabling either axis must address both steppers
//! together (the cross-wired endstop wiring a real CoreXY frame has).

use crate::error::MotionError;
use crate::homing::{home_axis, Endstop, HomingSpec};
use crate::move_plan::{Axis, Move};

use super::{trapezoid_segments, AxisLimits, DrivenStepper, Kinematics};

#[derive(Debug)]
pub struct CoreXyKinematics {
    pub a: DrivenStepper,
    pub b: DrivenStepper,
    pub z: DrivenStepper,
    limits: AxisLimits,
}

impl CoreXyKinematics {
    pub fn new(a: DrivenStepper, b: DrivenStepper, z: DrivenStepper, limits: AxisLimits) -> Self {
        CoreXyKinematics { a, b, z, limits }
    }

    fn drive_combined(&mut self, mv: &Move, print_time: f64) -> Result<(), MotionError> {
        let combined_d_a = mv.axes_d[0] + mv.axes_d[1];
        let combined_d_b = mv.axes_d[0] - mv.axes_d[1];
        let start_a = mv.start_pos.x + mv.start_pos.y;
        let start_b = mv.start_pos.x - mv.start_pos.y;

        if combined_d_a != 0.0 {
            let ratio = combined_d_a / mv.move_d;
            let mut offset = 0.0;
            for (_, seg_d, v, accel) in trapezoid_segments(mv) {
                self.a
                    .step_segment(print_time, start_a + offset * ratio, seg_d * ratio, v, accel, ratio)?;
                offset += seg_d;
            }
        }
        if combined_d_b != 0.0 {
            let ratio = combined_d_b / mv.move_d;
            let mut offset = 0.0;
            for (_, seg_d, v, accel) in trapezoid_segments(mv) {
                self.b
                    .step_segment(print_time, start_b + offset * ratio, seg_d * ratio, v, accel, ratio)?;
                offset += seg_d;
            }
        }
        Ok(())
    }

    fn drive_z(&mut self, mv: &Move, print_time: f64) -> Result<(), MotionError> {
        if mv.axes_d[2] == 0.0 {
            return Ok(());
        }
        let ratio = mv.axes_d[2] / mv.move_d;
        let mut offset = 0.0;
        for (_, seg_d, v, accel) in trapezoid_segments(mv) {
            self.z
                .step_segment(print_time, mv.start_pos.z + offset * ratio, seg_d * ratio, v, accel, ratio)?;
            offset += seg_d;
        }
        Ok(())
    }
}

impl Kinematics for CoreXyKinematics {
    fn check_move(&self, mv: &mut Move) -> Result<(), MotionError> {
        if mv.axes_d[2].abs() > 1e-9 {
            let z_ratio = mv.move_d / mv.axes_d[2].abs();
            mv.limit_speed(self.limits.max_z_velocity * z_ratio, self.limits.max_z_accel * z_ratio);
        }
        mv.limit_speed(self.limits.max_velocity, self.limits.max_jerk());

        let end = mv.end_pos;
        self.limits.check(0, Axis::X, end.x, mv.axes_d[0].abs() > 1e-9)?;
        self.limits.check(1, Axis::Y, end.y, mv.axes_d[1].abs() > 1e-9)?;
        self.limits.check(2, Axis::Z, end.z, mv.axes_d[2].abs() > 1e-9)?;
        Ok(())
    }

    fn move_(&mut self, print_time: f64, mv: &Move) -> Result<(), MotionError> {
        self.drive_combined(mv, print_time)?;
        self.drive_z(mv, print_time)?;
        Ok(())
    }

    fn set_position(&mut self, pos: [f64; 3]) {
        self.a.axis.set_position(pos[0] + pos[1]);
        self.b.axis.set_position(pos[0] - pos[1]);
        self.z.axis.set_position(pos[2]);
    }

    fn calc_position(&self) -> [f64; 3] {
        let a = self.a.axis.get_commanded_position();
        let b = self.b.axis.get_commanded_position();
        [(a + b) * 0.5, (a - b) * 0.5, self.z.axis.get_commanded_position()]
    }

    fn limits(&self) -> &AxisLimits {
        &self.limits
    }

    fn limits_mut(&mut self) -> &mut AxisLimits {
        &mut self.limits
    }

    fn home(&mut self, spec: &HomingSpec, endstop: &mut dyn Endstop) -> Result<f64, MotionError> {
        let idx = spec.axis.index();
        let trigger_pos = home_axis(spec, endstop)?;
        match spec.axis {
            Axis::X => {
                let y = self.calc_position()[1];
                self.a.axis.reconcile_from_trigger(trigger_pos + y);
                self.b.axis.reconcile_from_trigger(trigger_pos - y);
            }
            Axis::Y => {
                let x = self.calc_position()[0];
                self.a.axis.reconcile_from_trigger(x + trigger_pos);
                self.b.axis.reconcile_from_trigger(x - trigger_pos);
            }
            Axis::Z => {
                self.z.axis.reconcile_from_trigger(trigger_pos);
            }
            Axis::E => unreachable!("corexy kinematics never homes the extruder axis"),
        }
        self.limits.mark_homed(idx);
        Ok(spec.position_endstop)
    }

    fn motor_off(&mut self) {
        self.a.axis.motor_enable(false);
        self.b.axis.motor_enable(false);
        self.z.axis.motor_enable(false);
        self.limits.reset_all_unhomed();
    }

    fn query_endstops(&self, axis: Axis) -> Vec<&str> {
        match axis {
            Axis::X | Axis::Y => vec![self.a.axis.name.as_str(), self.b.axis.name.as_str()],
            Axis::Z => vec![self.z.axis.name.as_str()],
            Axis::E => vec![],
        }
    }

    fn get_z_steppers(&self) -> Vec<&str> {
        vec![self.z.axis.name.as_str()]
    }

    fn set_max_jerk(&mut self, jerk: f64) {
        self.limits.set_max_jerk(jerk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homing::FixedEndstop;
    use crate::step_queue::RecordingStepQueue;
    use crate::stepper::StepperAxis;
    use glam::DVec4;

    fn make() -> CoreXyKinematics {
        let limits = AxisLimits::new([(0.0, 300.0), (0.0, 300.0), (0.0, 300.0)], 300.0, 3000.0, 50.0, 500.0);
        CoreXyKinematics::new(
            DrivenStepper::new(StepperAxis::new("a", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("a"))),
            DrivenStepper::new(StepperAxis::new("b", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("b"))),
            DrivenStepper::new(StepperAxis::new("z", 0.0025, 16_000_000.0), Box::new(RecordingStepQueue::new("z"))),
            limits,
        )
    }

    fn homed(mut k: CoreXyKinematics) -> CoreXyKinematics {
        k.limits.mark_homed(0);
        k.limits.mark_homed(1);
        k.limits.mark_homed(2);
        k
    }

    #[test]
    fn position_round_trips_through_combined_steppers() {
        let mut k = make();
        k.set_position([10.0, 20.0, 5.0]);
        let pos = k.calc_position();
        assert!((pos[0] - 10.0).abs() < 1e-6);
        assert!((pos[1] - 20.0).abs() < 1e-6);
        assert!((pos[2] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn pure_x_move_drives_both_belt_steppers_equally() {
        let mut k = homed(make());
        let mut mv = crate::move_plan::Move::new(
            DVec4::new(0.0, 0.0, 0.0, 0.0),
            DVec4::new(30.0, 0.0, 0.0, 0.0),
            100.0,
            1000.0,
            500.0,
        );
        mv.set_junction(0.0, mv.max_cruise_v2, 0.0);
        k.move_(0.0, &mv).unwrap();
        let pos = k.calc_position();
        assert!((pos[0] - 30.0).abs() < 0.05);
        assert!(pos[1].abs() < 0.05);
    }

    #[test]
    fn homing_x_reconciles_both_belt_steppers() {
        let mut k = make();
        k.set_position([0.0, 7.0, 0.0]);
        let spec = HomingSpec {
            axis: Axis::X,
            position_endstop: 0.0,
            position_min: -10.0,
            position_max: 200.0,
            approach_speed: 50.0,
            retract_dist: 5.0,
            second_homing_speed: 10.0,
        };
        let mut endstop = FixedEndstop { trigger_at: 0.0 };
        let homed_pos = k.home(&spec, &mut endstop).unwrap();
        assert_eq!(homed_pos, 0.0);
        assert!(k.limits.is_homed(0));
        let pos = k.calc_position();
        assert!((pos[0] - 0.0).abs() < 1e-6);
        assert!((pos[1] - 7.0).abs() < 1e-6);
    }
}
