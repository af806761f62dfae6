//! Cartesian kinematics: X, Y and Z steppers each drive their own axis
//! directly. Grounded on `klippy/cartesian.py`.

use crate::error::MotionError;
use crate::homing::{home_axis, Endstop, HomingSpec};
use crate::move_plan::{Axis, Move};

use super::{trapezoid_segments, AxisLimits, DrivenStepper, Kinematics};

#[derive(Debug)]
pub struct CartesianKinematics {
    pub x: DrivenStepper,
    pub y: DrivenStepper,
    pub z: DrivenStepper,
    limits: AxisLimits,
}

impl CartesianKinematics {
    pub fn new(x: DrivenStepper, y: DrivenStepper, z: DrivenStepper, limits: AxisLimits) -> Self {
        CartesianKinematics { x, y, z, limits }
    }

    fn drive_axis(
        &mut self,
        idx: usize,
        axis_label: Axis,
        mv: &Move,
        print_time: f64,
    ) -> Result<(), MotionError> {
        let axis_d = mv.axes_d[idx];
        if axis_d == 0.0 {
            return Ok(());
        }
        let ratio = axis_d / mv.move_d;
        let start_pos = mv.start_pos[idx];
        let stepper = match axis_label {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::E => unreachable!("cartesian kinematics never drives the extruder axis"),
        };
        let mut offset = 0.0;
        for (seg_start, seg_d, v, a) in trapezoid_segments(mv) {
            let _ = seg_start;
            stepper.step_segment(print_time, start_pos + offset * ratio, seg_d * ratio, v, a, ratio)?;
            offset += seg_d;
        }
        Ok(())
    }

    fn stepper_mut(&mut self, axis: Axis) -> &mut DrivenStepper {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::E => unreachable!("cartesian kinematics never homes the extruder axis"),
        }
    }
}

impl Kinematics for CartesianKinematics {
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
        self.drive_axis(0, Axis::X, mv, print_time)?;
        self.drive_axis(1, Axis::Y, mv, print_time)?;
        self.drive_axis(2, Axis::Z, mv, print_time)?;
        Ok(())
    }

    fn set_position(&mut self, pos: [f64; 3]) {
        self.x.axis.set_position(pos[0]);
        self.y.axis.set_position(pos[1]);
        self.z.axis.set_position(pos[2]);
    }

    fn calc_position(&self) -> [f64; 3] {
        [
            self.x.axis.get_commanded_position(),
            self.y.axis.get_commanded_position(),
            self.z.axis.get_commanded_position(),
        ]
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
        self.stepper_mut(spec.axis).axis.reconcile_from_trigger(trigger_pos);
        self.limits.mark_homed(idx);
        Ok(spec.position_endstop)
    }

    fn motor_off(&mut self) {
        self.x.axis.motor_enable(false);
        self.y.axis.motor_enable(false);
        self.z.axis.motor_enable(false);
        self.limits.reset_all_unhomed();
    }

    fn query_endstops(&self, axis: Axis) -> Vec<&str> {
        match axis {
            Axis::X => vec![self.x.axis.name.as_str()],
            Axis::Y => vec![self.y.axis.name.as_str()],
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
    use crate::step_queue::RecordingStepQueue;
    use crate::stepper::StepperAxis;
    use glam::DVec4;

    fn make() -> CartesianKinematics {
        let limits = AxisLimits::new([(0.0, 300.0), (0.0, 300.0), (0.0, 300.0)], 300.0, 3000.0, 50.0, 500.0);
        CartesianKinematics::new(
            DrivenStepper::new(StepperAxis::new("x", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("x"))),
            DrivenStepper::new(StepperAxis::new("y", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("y"))),
            DrivenStepper::new(StepperAxis::new("z", 0.0025, 16_000_000.0), Box::new(RecordingStepQueue::new("z"))),
            limits,
        )
    }

    fn homed(mut k: CartesianKinematics) -> CartesianKinematics {
        k.limits.mark_homed(0);
        k.limits.mark_homed(1);
        k.limits.mark_homed(2);
        k
    }

    #[test]
    fn straight_x_move_only_drives_the_x_stepper() {
        let mut k = homed(make());
        let mut mv = crate::move_plan::Move::new(
            DVec4::new(0.0, 0.0, 0.0, 0.0),
            DVec4::new(50.0, 0.0, 0.0, 0.0),
            100.0,
            1000.0,
            500.0,
        );
        mv.set_junction(0.0, mv.max_cruise_v2, 0.0);
        k.move_(0.0, &mv).unwrap();
        assert!(k.x.axis.get_commanded_position() > 0.0);
        assert_eq!(k.y.axis.get_commanded_position(), 0.0);
    }

    #[test]
    fn beyond_max_travel_is_rejected() {
        let k = homed(make());
        let mut mv = crate::move_plan::Move::new(
            DVec4::new(0.0, 0.0, 0.0, 0.0),
            DVec4::new(400.0, 0.0, 0.0, 0.0),
            100.0,
            1000.0,
            500.0,
        );
        assert!(k.check_move(&mut mv).is_err());
    }

    #[test]
    fn unhomed_axis_rejects_any_displacement() {
        let k = make();
        let mut mv = crate::move_plan::Move::new(
            DVec4::new(0.0, 0.0, 0.0, 0.0),
            DVec4::new(10.0, 0.0, 0.0, 0.0),
            100.0,
            1000.0,
            500.0,
        );
        let err = k.check_move(&mut mv).unwrap_err();
        assert!(matches!(err, MotionError::MustHomeAxisFirst { .. }));
    }

    #[test]
    fn z_bearing_move_clamps_cruise_speed_to_the_z_ratio() {
        // 4 mm in Z out of a 5 mm move (z_ratio = move_d / |dz| = 1.25);
        // max_z_velocity is 50 mm/s, so cruise clamps to 50 / 1.25 = 40.
        let mut k = homed(make());
        k.limits.max_z_velocity = 5.0;
        let mut mv = crate::move_plan::Move::new(
            DVec4::new(0.0, 0.0, 0.0, 0.0),
            DVec4::new(3.0, 0.0, 4.0, 0.0),
            100.0,
            1000.0,
            500.0,
        );
        k.check_move(&mut mv).unwrap();
        let z_ratio = mv.move_d / mv.axes_d[2].abs();
        assert!((mv.max_cruise_v2.sqrt() - 5.0 * z_ratio).abs() < 1e-6);
    }
}
