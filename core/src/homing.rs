//! Homing protocol: approach, retract, re-approach, read back the
//! triggered position, then let the caller reconcile the host's notion of
//! position against it.

use crate::error::MotionError;
use crate::move_plan::Axis;

/// One homing sensor collaborator. Real implementations drive an actual
/// move toward the endstop and watch for the MCU's trigger message; this
/// trait only exposes the outcome the homing driver needs.
pub trait Endstop: std::fmt::Debug {
    /// Triggered position (mm) reached approaching from `start_pos` toward
    /// `target_pos`. `None` means the endstop never triggered before the
    /// move completed (see `MotionError::HomingTimeout`).
    fn probe(&mut self, start_pos: f64, target_pos: f64) -> Option<f64>;
}

/// Reference endstop for tests and the demo binary: triggers at a fixed
/// physical position along the probed axis.
#[derive(Debug, Clone, Copy)]
pub struct FixedEndstop {
    pub trigger_at: f64,
}

impl Endstop for FixedEndstop {
    fn probe(&mut self, start_pos: f64, target_pos: f64) -> Option<f64> {
        let forward = target_pos >= start_pos;
        let within_range = if forward {
            self.trigger_at >= start_pos && self.trigger_at <= target_pos
        } else {
            self.trigger_at <= start_pos && self.trigger_at >= target_pos
        };
        if within_range {
            Some(self.trigger_at)
        } else {
            None
        }
    }
}

/// Per-axis homing configuration (mirrors `[stepper_*]`'s `endstop_pin`,
/// `position_min`/`position_max`, `homing_speed`, `homing_retract_dist` and
/// `second_homing_speed`).
#[derive(Debug, Clone, Copy)]
pub struct HomingSpec {
    pub axis: Axis,
    pub position_endstop: f64,
    pub position_min: f64,
    pub position_max: f64,
    pub approach_speed: f64,
    pub retract_dist: f64,
    pub second_homing_speed: f64,
}

/// The non-physical `set_position` sentinel the first approach move starts
/// from: overshoots the endstop by 50% of the rail's travel range on the
/// approach side, guaranteeing the commanded move crosses it.
pub fn forced_start_position(spec: &HomingSpec) -> f64 {
    if spec.position_endstop > spec.position_min {
        spec.position_endstop - 1.5 * (spec.position_endstop - spec.position_min)
    } else {
        spec.position_endstop + 1.5 * (spec.position_max - spec.position_endstop)
    }
}

/// Runs the approach/retract/re-approach dance and returns the MCU-reported
/// trigger position the caller should reconcile the stepper's position
/// model against (`StepperAxis::reconcile_from_trigger`).
pub fn home_axis(spec: &HomingSpec, endstop: &mut dyn Endstop) -> Result<f64, MotionError> {
    let endstop_name = format!("{:?}", spec.axis);
    let forced_start = forced_start_position(spec);
    let dir = if spec.position_endstop >= forced_start { 1.0 } else { -1.0 };

    // 1. Approach at full homing speed from the forced, non-physical start.
    let first_trigger = endstop
        .probe(forced_start, spec.position_endstop)
        .ok_or_else(|| MotionError::HomingTimeout {
            endstop: endstop_name.clone(),
        })?;

    if spec.retract_dist <= 0.0 {
        return Ok(first_trigger);
    }

    // 2. Retract away from the endstop.
    let retract_pos = first_trigger - dir * spec.retract_dist;

    // 3. Re-approach slowly, recrossing the endstop for a precise second
    // trigger.
    let second_target = retract_pos + dir * spec.retract_dist;
    endstop
        .probe(retract_pos, second_target)
        .ok_or_else(|| MotionError::HomingTimeout {
            endstop: endstop_name,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homing_reports_configured_trigger_position() {
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
        let pos = home_axis(&spec, &mut endstop).unwrap();
        assert_eq!(pos, 0.0);
    }

    #[test]
    fn unreachable_endstop_times_out() {
        let spec = HomingSpec {
            axis: Axis::Z,
            position_endstop: 0.0,
            position_min: 0.0,
            position_max: 10.0,
            approach_speed: 5.0,
            retract_dist: 2.0,
            second_homing_speed: 2.0,
        };
        let mut endstop = FixedEndstop { trigger_at: 100.0 };
        let err = home_axis(&spec, &mut endstop).unwrap_err();
        assert!(matches!(err, MotionError::HomingTimeout { .. }));
    }

    #[test]
    fn negative_dir_endstop_overshoots_on_the_high_side() {
        let spec = HomingSpec {
            axis: Axis::X,
            position_endstop: 200.0,
            position_min: 0.0,
            position_max: 200.0,
            approach_speed: 50.0,
            retract_dist: 5.0,
            second_homing_speed: 10.0,
        };
        assert!((forced_start_position(&spec) - (-100.0)).abs() < 1e-9);
        let mut endstop = FixedEndstop { trigger_at: 200.0 };
        let pos = home_axis(&spec, &mut endstop).unwrap();
        assert_eq!(pos, 200.0);
    }
}
