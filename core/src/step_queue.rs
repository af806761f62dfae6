//! The step-compressor primitive: an opaque, per-stepper buffer that
//! converts a constant-acceleration segment into MCU `queue_step` messages.
//! Thread-confined; the real implementation (a C step-compression routine in
//! the system this is ported from) is assumed available. [`RecordingStepQueue`]
//! is a reference implementation good enough to drive tests and the demo
//! binary: it just records the segments it was asked to produce and returns
//! a plausible step count, while enforcing the ordering contract.

use crate::error::MotionError;

/// A single constant-acceleration segment as submitted to a stepper's queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSegment {
    pub mcu_clock: u64,
    pub step_offset: i64,
    pub distance_steps: f64,
    pub start_v_ticks: f64,
    pub accel_ticks2: f64,
}

pub trait StepQueue {
    /// Discard pending steps and establish a new origin clock.
    fn reset(&mut self, mcu_clock: u64);

    /// Mark the queue as "homing until this clock" (absorbs cancellation on
    /// endstop trigger).
    fn set_homing(&mut self, clock: u64);

    /// Queue a constant-acceleration segment. Returns the signed step count
    /// produced (sign carries direction). Submission order must be
    /// time-monotonic per stepper (invariant 5).
    fn push_const(&mut self, segment: StepSegment) -> Result<i32, MotionError>;

    /// Queue a raw MCU message (used for explicit clock-reset commands).
    fn queue_msg(&mut self, raw_bytes: &[u8]);
}

/// Reference in-memory `StepQueue`. Step count produced is
/// `round(distance_steps)`, which is the behavior step compressors exhibit
/// in the small-distance-per-segment regime motion planning produces.
#[derive(Debug, Default)]
pub struct RecordingStepQueue {
    pub name: String,
    pub segments: Vec<StepSegment>,
    pub messages: Vec<Vec<u8>>,
    homing_until: Option<u64>,
    last_clock: Option<u64>,
}

impl RecordingStepQueue {
    pub fn new(name: impl Into<String>) -> Self {
        RecordingStepQueue {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_homing(&self) -> bool {
        self.homing_until.is_some()
    }
}

impl StepQueue for RecordingStepQueue {
    fn reset(&mut self, mcu_clock: u64) {
        self.segments.clear();
        self.messages.clear();
        self.homing_until = None;
        self.last_clock = Some(mcu_clock);
    }

    fn set_homing(&mut self, clock: u64) {
        self.homing_until = Some(clock);
    }

    fn push_const(&mut self, segment: StepSegment) -> Result<i32, MotionError> {
        if let Some(last) = self.last_clock {
            if segment.mcu_clock < last {
                return Err(MotionError::StepQueueOrdering {
                    stepper: self.name.clone(),
                });
            }
        }
        self.last_clock = Some(segment.mcu_clock);
        let steps = segment.distance_steps.round() as i32;
        self.segments.push(segment);
        Ok(steps)
    }

    fn queue_msg(&mut self, raw_bytes: &[u8]) {
        self.messages.push(raw_bytes.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_order_segments() {
        let mut q = RecordingStepQueue::new("x");
        q.push_const(StepSegment {
            mcu_clock: 100,
            step_offset: 0,
            distance_steps: 10.0,
            start_v_ticks: 0.0,
            accel_ticks2: 0.0,
        })
        .unwrap();
        let err = q
            .push_const(StepSegment {
                mcu_clock: 50,
                step_offset: 0,
                distance_steps: 1.0,
                start_v_ticks: 0.0,
                accel_ticks2: 0.0,
            })
            .unwrap_err();
        assert!(matches!(err, MotionError::StepQueueOrdering { .. }));
    }
}
