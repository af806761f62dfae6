//! Kinematic transforms: the piece of the pipeline that turns a Cartesian
//! [`Move`](crate::move_plan::Move) into per-stepper step segments.
//!
//! Grounded on `klippy/cartesian.py` and `klippy/corexy.py`: both share the
//! same trapezoidal-move-to-stepper translation and the same homing/soft-
//! limit/motor-enable contract, differing only in how a requested (dx, dy)
//! maps onto physical stepper travel.

pub mod cartesian;
pub mod corexy;

use std::fmt;

use crate::error::MotionError;
use crate::homing::{Endstop, HomingSpec};
use crate::move_plan::{Axis, Move};
use crate::step_queue::StepQueue;
use crate::stepper::StepperAxis;

pub use cartesian::CartesianKinematics;
pub use corexy::CoreXyKinematics;

/// `(lo, hi)` pair with `lo > hi` reserved as the "not yet homed" sentinel.
type Range = (f64, f64);

/// Soft travel limits shared by every kinematics variant.
///
/// `range` tracks the live, per-axis homed state: each entry starts at
/// [`AxisLimits::UNHOMED`] and is only set to the corresponding
/// `full_range` entry once that axis homes (invariant 4). `motor_off`
/// resets every entry back to `UNHOMED`.
#[derive(Debug, Clone, Copy)]
pub struct AxisLimits {
    full_range: [Range; 3],
    range: [Range; 3],
    pub max_velocity: f64,
    pub max_accel: f64,
    pub max_z_velocity: f64,
    pub max_z_accel: f64,
    max_jerk: f64,
}

impl AxisLimits {
    pub const UNHOMED: Range = (1.0, -1.0);

    pub fn new(
        full_range: [Range; 3],
        max_velocity: f64,
        max_accel: f64,
        max_z_velocity: f64,
        max_z_accel: f64,
    ) -> Self {
        AxisLimits {
            full_range,
            range: [Self::UNHOMED; 3],
            max_velocity,
            max_accel,
            max_z_velocity,
            max_z_accel,
            max_jerk: max_accel,
        }
    }

    pub fn is_homed(&self, axis_index: usize) -> bool {
        let (lo, hi) = self.range[axis_index];
        lo <= hi
    }

    pub fn full_range(&self, axis_index: usize) -> Range {
        self.full_range[axis_index]
    }

    /// Marks `axis_index` homed: its live range becomes its full travel.
    pub fn mark_homed(&mut self, axis_index: usize) {
        self.range[axis_index] = self.full_range[axis_index];
    }

    /// Resets `axis_index` back to the unhomed sentinel.
    pub fn reset_unhomed(&mut self, axis_index: usize) {
        self.range[axis_index] = Self::UNHOMED;
    }

    /// Resets every axis back to the unhomed sentinel (`motor_off`).
    pub fn reset_all_unhomed(&mut self) {
        self.range = [Self::UNHOMED; 3];
    }

    pub fn max_jerk(&self) -> f64 {
        self.max_jerk
    }

    pub fn set_max_jerk(&mut self, jerk: f64) {
        self.max_jerk = jerk;
    }

    /// Invariant 4's two disjuncts: an unhomed axis rejects any nonzero
    /// displacement; a homed axis rejects any position outside its
    /// configured range.
    pub fn check(&self, axis_index: usize, axis: Axis, position: f64, displaced: bool) -> Result<(), MotionError> {
        let (lo, hi) = self.range[axis_index];
        if lo > hi {
            if displaced {
                return Err(MotionError::MustHomeAxisFirst { axis });
            }
            return Ok(());
        }
        if position < lo - 1e-7 || position > hi + 1e-7 {
            return Err(MotionError::BeyondLimit { axis, position });
        }
        Ok(())
    }
}

/// A stepper paired with the opaque step-compression queue it submits to.
pub struct DrivenStepper {
    pub axis: StepperAxis,
    pub queue: Box<dyn StepQueue>,
}

impl fmt::Debug for DrivenStepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrivenStepper").field("axis", &self.axis).finish()
    }
}

impl DrivenStepper {
    pub fn new(axis: StepperAxis, queue: Box<dyn StepQueue>) -> Self {
        DrivenStepper { axis, queue }
    }

    /// Submits one constant-acceleration segment for this physical stepper,
    /// scaling the move's start/cruise velocities and acceleration by this
    /// stepper's share (`ratio`) of the overall move distance.
    fn step_segment(
        &mut self,
        print_time: f64,
        start_pos: f64,
        distance: f64,
        start_v: f64,
        accel: f64,
        ratio: f64,
    ) -> Result<(), MotionError> {
        if distance == 0.0 {
            return Ok(());
        }
        let mcu_clock = (print_time * self.axis.mcu_freq()).round() as u64;
        self.axis.step_const(
            self.queue.as_mut(),
            mcu_clock,
            start_pos,
            distance,
            start_v * ratio,
            accel * ratio,
        )
    }
}

/// Trait implemented by each concrete kinematics layout.
pub trait Kinematics: fmt::Debug {
    /// Validates a planned move against soft travel limits and the homed-
    /// axis invariant, clamping cruise speed/acceleration for Z-bearing
    /// moves to the Z axis's own limits before admission.
    fn check_move(&self, mv: &mut Move) -> Result<(), MotionError>;

    /// Schedules `mv`'s three accel/cruise/decel segments on every physical
    /// stepper this layout drives, starting at `print_time`.
    fn move_(&mut self, print_time: f64, mv: &Move) -> Result<(), MotionError>;

    /// Resets the host's notion of toolhead position after homing or a
    /// `SET_POSITION`-style override.
    fn set_position(&mut self, pos: [f64; 3]);

    /// Reports the position implied by the steppers' commanded step counts.
    fn calc_position(&self) -> [f64; 3];

    fn limits(&self) -> &AxisLimits;

    fn limits_mut(&mut self) -> &mut AxisLimits;

    /// Runs the homing protocol for `spec.axis`, reconciles every physical
    /// stepper this layout wires to that axis against the MCU-reported
    /// trigger, and marks the axis homed. Returns the final host-side
    /// position (`spec.position_endstop`).
    fn home(&mut self, spec: &HomingSpec, endstop: &mut dyn Endstop) -> Result<f64, MotionError>;

    /// Disables every stepper this layout drives and resets the unhomed
    /// sentinel on every axis.
    fn motor_off(&mut self);

    /// Which physical stepper names must be watched while homing `axis`
    /// (CoreXY's belt coupling means X and Y homing watch both A and B).
    fn query_endstops(&self, axis: Axis) -> Vec<&str>;

    /// Names of the steppers driving the Z axis.
    fn get_z_steppers(&self) -> Vec<&str>;

    /// Sets the runtime jerk (acceleration-ceiling) limit applied to every
    /// move in addition to its own requested acceleration.
    fn set_max_jerk(&mut self, jerk: f64);
}

/// Config-selected kinematics, dispatching to whichever concrete layout the
/// printer configuration names (Cartesian or CoreXY).
#[derive(Debug)]
pub enum KinematicsKind {
    Cartesian(CartesianKinematics),
    CoreXy(CoreXyKinematics),
}

impl Kinematics for KinematicsKind {
    fn check_move(&self, mv: &mut Move) -> Result<(), MotionError> {
        match self {
            KinematicsKind::Cartesian(k) => k.check_move(mv),
            KinematicsKind::CoreXy(k) => k.check_move(mv),
        }
    }

    fn move_(&mut self, print_time: f64, mv: &Move) -> Result<(), MotionError> {
        match self {
            KinematicsKind::Cartesian(k) => k.move_(print_time, mv),
            KinematicsKind::CoreXy(k) => k.move_(print_time, mv),
        }
    }

    fn set_position(&mut self, pos: [f64; 3]) {
        match self {
            KinematicsKind::Cartesian(k) => k.set_position(pos),
            KinematicsKind::CoreXy(k) => k.set_position(pos),
        }
    }

    fn calc_position(&self) -> [f64; 3] {
        match self {
            KinematicsKind::Cartesian(k) => k.calc_position(),
            KinematicsKind::CoreXy(k) => k.calc_position(),
        }
    }

    fn limits(&self) -> &AxisLimits {
        match self {
            KinematicsKind::Cartesian(k) => k.limits(),
            KinematicsKind::CoreXy(k) => k.limits(),
        }
    }

    fn limits_mut(&mut self) -> &mut AxisLimits {
        match self {
            KinematicsKind::Cartesian(k) => k.limits_mut(),
            KinematicsKind::CoreXy(k) => k.limits_mut(),
        }
    }

    fn home(&mut self, spec: &HomingSpec, endstop: &mut dyn Endstop) -> Result<f64, MotionError> {
        match self {
            KinematicsKind::Cartesian(k) => k.home(spec, endstop),
            KinematicsKind::CoreXy(k) => k.home(spec, endstop),
        }
    }

    fn motor_off(&mut self) {
        match self {
            KinematicsKind::Cartesian(k) => k.motor_off(),
            KinematicsKind::CoreXy(k) => k.motor_off(),
        }
    }

    fn query_endstops(&self, axis: Axis) -> Vec<&str> {
        match self {
            KinematicsKind::Cartesian(k) => k.query_endstops(axis),
            KinematicsKind::CoreXy(k) => k.query_endstops(axis),
        }
    }

    fn get_z_steppers(&self) -> Vec<&str> {
        match self {
            KinematicsKind::Cartesian(k) => k.get_z_steppers(),
            KinematicsKind::CoreXy(k) => k.get_z_steppers(),
        }
    }

    fn set_max_jerk(&mut self, jerk: f64) {
        match self {
            KinematicsKind::Cartesian(k) => k.set_max_jerk(jerk),
            KinematicsKind::CoreXy(k) => k.set_max_jerk(jerk),
        }
    }
}

/// Splits one trapezoidal [`Move`] into its three (accel, cruise, decel)
/// sub-segments, yielding `(start_pos, distance, start_v, accel)` triples
/// along the move's direction of travel, scaled to `[0, 1]` ratios the
/// caller multiplies by each stepper's axis delta.
pub(crate) fn trapezoid_segments(mv: &Move) -> [(f64, f64, f64, f64); 3] {
    let accel_d = mv.accel_r * mv.move_d;
    let cruise_d = mv.cruise_r * mv.move_d;
    let decel_d = mv.decel_r * mv.move_d;
    [
        (0.0, accel_d, mv.start_v, mv.accel),
        (accel_d, cruise_d, mv.cruise_v, 0.0),
        (accel_d + cruise_d, decel_d, mv.cruise_v, -mv.accel),
    ]
}
