//! Printer configuration: the serde-decoded shape a config file or G-code
//! front end builds a [`ToolHead`] from.
//! Grounded on `PrinterLimits` (`lib/src/planner.rs`), reshaped around
//! per-stepper and per-axis fields instead of one flat limits struct.

use serde::{Deserialize, Serialize};

use crate::kinematics::AxisLimits;
use crate::toolhead::MoveLimits;

fn default_square_corner_velocity() -> f64 {
    5.0
}

fn default_max_accel_to_decel_ratio() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KinematicsType {
    Cartesian,
    Corexy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperConfig {
    pub name: String,
    pub step_distance: f64,
    #[serde(default)]
    pub invert_step: bool,
    #[serde(default)]
    pub invert_dir: bool,
    #[serde(default)]
    pub min_stop_interval: f64,
    pub position_endstop: f64,
    pub position_min: f64,
    pub position_max: f64,
    pub homing_speed: f64,
    #[serde(default = "default_retract_dist")]
    pub homing_retract_dist: f64,
    #[serde(default)]
    pub second_homing_speed: Option<f64>,
}

fn default_retract_dist() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub kinematics: KinematicsType,
    pub mcu_freq: f64,
    pub max_velocity: f64,
    pub max_accel: f64,
    #[serde(default = "default_max_accel_to_decel_ratio")]
    pub max_accel_to_decel_ratio: f64,
    #[serde(default = "default_square_corner_velocity")]
    pub square_corner_velocity: f64,
    /// Z's own velocity ceiling, distinct from `max_velocity` (Z stages are
    /// typically lead-screw driven and much slower than XY). Defaults to
    /// `max_velocity` when unset.
    #[serde(default)]
    pub max_z_velocity: Option<f64>,
    /// Z's own acceleration ceiling. Defaults to `max_accel` when unset.
    #[serde(default)]
    pub max_z_accel: Option<f64>,
    pub steppers: Vec<StepperConfig>,
}

impl PrinterConfig {
    /// Converts the configured square-corner velocity into the junction
    /// deviation the planner actually works in.
    pub fn junction_deviation(&self) -> f64 {
        let scv2 = self.square_corner_velocity * self.square_corner_velocity;
        scv2 * (2.0_f64.sqrt() - 1.0) / self.max_accel
    }

    pub fn max_z_velocity(&self) -> f64 {
        self.max_z_velocity.unwrap_or(self.max_velocity)
    }

    pub fn max_z_accel(&self) -> f64 {
        self.max_z_accel.unwrap_or(self.max_accel)
    }

    pub fn move_limits(&self) -> MoveLimits {
        MoveLimits {
            max_velocity: self.max_velocity,
            max_accel: self.max_accel,
            max_accel_to_decel: self.max_accel * self.max_accel_to_decel_ratio,
            junction_deviation: self.junction_deviation(),
        }
    }

    pub fn axis_limits(&self) -> AxisLimits {
        let mut full_range = [(0.0, 0.0); 3];
        for (i, s) in self.steppers.iter().take(3).enumerate() {
            full_range[i] = (s.position_min, s.position_max);
        }
        AxisLimits::new(full_range, self.max_velocity, self.max_accel, self.max_z_velocity(), self.max_z_accel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junction_deviation_matches_scv_conversion() {
        let cfg = PrinterConfig {
            kinematics: KinematicsType::Cartesian,
            mcu_freq: 16_000_000.0,
            max_velocity: 300.0,
            max_accel: 3000.0,
            max_accel_to_decel_ratio: 0.5,
            square_corner_velocity: 5.0,
            max_z_velocity: None,
            max_z_accel: None,
            steppers: vec![],
        };
        let jd = cfg.junction_deviation();
        assert!(jd > 0.0 && jd < 1.0);
    }
}
