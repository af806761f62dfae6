//! `StepperAxis`: the per-motor state the kinematics layer drives.
//!
//! Grounded on `klippy/mcu.py`'s `MCU_stepper`: step distance, commanded
//! step count, MCU position offset, and the velocity/acceleration scaling
//! factors that convert mm-space quantities into per-tick units before they
//! reach the step compressor.

use crate::error::MotionError;
use crate::step_queue::{StepQueue, StepSegment};

#[derive(Debug)]
pub struct StepperAxis {
    pub name: String,
    step_dist: f64,
    inv_step_dist: f64,
    commanded_pos: i64,
    mcu_position_offset: i64,
    mcu_freq: f64,
    velocity_factor: f64,
    accel_factor: f64,
    min_stop_interval: f64,
    invert_step: bool,
    invert_dir: bool,
    need_motor_enable: bool,
    homing: bool,
}

impl StepperAxis {
    pub fn new(name: impl Into<String>, step_dist: f64, mcu_freq: f64) -> Self {
        let mut s = StepperAxis {
            name: name.into(),
            step_dist,
            inv_step_dist: 1.0 / step_dist,
            commanded_pos: 0,
            mcu_position_offset: 0,
            mcu_freq,
            velocity_factor: 0.0,
            accel_factor: 0.0,
            min_stop_interval: 0.0,
            invert_step: false,
            invert_dir: false,
            need_motor_enable: true,
            homing: false,
        };
        s.build_config();
        s
    }

    pub fn with_inversion(mut self, invert_step: bool, invert_dir: bool) -> Self {
        self.invert_step = invert_step;
        self.invert_dir = invert_dir;
        self
    }

    pub fn with_min_stop_interval(mut self, min_stop_interval: f64) -> Self {
        self.min_stop_interval = min_stop_interval;
        self
    }

    fn build_config(&mut self) {
        self.velocity_factor = 1.0 / (self.mcu_freq * self.step_dist);
        self.accel_factor = 1.0 / (self.mcu_freq * self.mcu_freq * self.step_dist);
    }

    pub fn step_distance(&self) -> f64 {
        self.step_dist
    }

    pub fn min_stop_interval(&self) -> f64 {
        self.min_stop_interval
    }

    pub fn mcu_freq(&self) -> f64 {
        self.mcu_freq
    }

    /// Converts a real-valued millimeter position into the integer step
    /// count, adjusting `mcu_position_offset` so `get_commanded_position`
    /// stays consistent (invariant 6).
    pub fn set_position(&mut self, pos: f64) {
        let steppos = if pos >= 0.0 {
            (pos * self.inv_step_dist + 0.5).floor() as i64
        } else {
            (pos * self.inv_step_dist - 0.5).ceil() as i64
        };
        self.mcu_position_offset += self.commanded_pos - steppos;
        self.commanded_pos = steppos;
    }

    pub fn get_commanded_position(&self) -> f64 {
        self.commanded_pos as f64 * self.step_dist
    }

    pub fn get_mcu_position(&self) -> i64 {
        self.commanded_pos + self.mcu_position_offset
    }

    /// Reconciles the host model to a step count read back live from the
    /// MCU during homing.
    pub fn set_mcu_position(&mut self, mcu_pos: i64) {
        self.commanded_pos = mcu_pos - self.mcu_position_offset;
    }

    /// Reconciles the commanded position against a trigger position read
    /// back live from the MCU during homing (invariant 6), canceling
    /// whatever `mcu_position_offset` was accumulated up to this point.
    pub fn reconcile_from_trigger(&mut self, trigger_pos: f64) {
        let steps = (trigger_pos * self.inv_step_dist).round() as i64;
        self.set_mcu_position(steps + self.mcu_position_offset);
    }

    pub fn motor_enable(&mut self, enable: bool) {
        self.need_motor_enable = !enable;
    }

    pub fn needs_motor_enable(&self) -> bool {
        self.need_motor_enable
    }

    pub fn is_homing(&self) -> bool {
        self.homing
    }

    /// Submits a constant-acceleration segment starting at `start_pos` (mm),
    /// queues it on the opaque step-compressor primitive, and advances the
    /// commanded step count by the number of steps the primitive reports
    /// having produced.
    pub fn step_const(
        &mut self,
        queue: &mut dyn StepQueue,
        mcu_clock: u64,
        start_pos: f64,
        distance: f64,
        start_v: f64,
        accel: f64,
    ) -> Result<(), MotionError> {
        if distance == 0.0 {
            return Ok(());
        }
        let step_offset = (start_pos * self.inv_step_dist).round() as i64 - self.commanded_pos;
        let distance_steps = distance * self.inv_step_dist;
        let start_v_ticks = start_v * self.velocity_factor;
        let accel_ticks2 = accel * self.accel_factor;
        let steps = queue.push_const(StepSegment {
            mcu_clock,
            step_offset,
            distance_steps,
            start_v_ticks,
            accel_ticks2,
        })?;
        self.commanded_pos += steps as i64;
        Ok(())
    }

    pub fn home_start(&mut self, queue: &mut dyn StepQueue, clock: u64) {
        self.homing = true;
        queue.set_homing(clock);
    }

    pub fn home_finalize(&mut self) {
        self.homing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_position_round_trips_within_one_step() {
        let mut s = StepperAxis::new("x", 0.00625, 16_000_000.0);
        s.set_position(123.456);
        let got = s.get_commanded_position();
        assert!((got - 123.456).abs() <= s.step_distance());
    }

    #[test]
    fn negative_positions_round_to_nearest_step() {
        let mut s = StepperAxis::new("z", 0.0025, 16_000_000.0);
        s.set_position(-10.0);
        let got = s.get_commanded_position();
        assert!((got - (-10.0)).abs() <= s.step_distance());
    }
}
