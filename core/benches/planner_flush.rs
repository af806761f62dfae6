use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::DVec4;

use motion_core::extruder::DummyExtruder;
use motion_core::kinematics::cartesian::CartesianKinematics;
use motion_core::kinematics::{AxisLimits, DrivenStepper, KinematicsKind};
use motion_core::mcu::SimulatedMcu;
use motion_core::queue::MoveQueue;
use motion_core::step_queue::RecordingStepQueue;
use motion_core::stepper::StepperAxis;
use motion_core::toolhead::{PlannerState, PrintClock};
use motion_core::Move;

fn build_state() -> PlannerState {
    let limits = AxisLimits::new([(0.0, 300.0), (0.0, 300.0), (0.0, 300.0)], 300.0, 3000.0, 300.0, 3000.0);
    let k = CartesianKinematics::new(
        DrivenStepper::new(StepperAxis::new("x", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("x"))),
        DrivenStepper::new(StepperAxis::new("y", 0.0125, 16_000_000.0), Box::new(RecordingStepQueue::new("y"))),
        DrivenStepper::new(StepperAxis::new("z", 0.0025, 16_000_000.0), Box::new(RecordingStepQueue::new("z"))),
        limits,
    );
    PlannerState {
        kinematics: KinematicsKind::Cartesian(k),
        extruder: Box::new(DummyExtruder),
        mcu: Box::new(SimulatedMcu::new()),
        clock: PrintClock::new(),
    }
}

/// A zigzag path of 200 short moves, the shape that stresses the backward
/// junction-deviation pass the hardest (every corner re-evaluates the
/// smoothed-velocity chain all the way back to the queue head).
fn build_queue(n: usize) -> MoveQueue {
    let mut q = MoveQueue::new(0.02);
    let extruder = DummyExtruder;
    let mut pos = DVec4::new(0.0, 0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = if i % 2 == 0 { 1.0 } else { 0.0 };
        let dy = if i % 2 == 0 { 0.0 } else { 1.0 };
        let end = DVec4::new(pos.x + dx, pos.y + dy, 0.0, 0.0);
        q.add_move(Move::new(pos, end, 150.0, 1500.0, 750.0), &extruder);
        pos = end;
    }
    q
}

fn flush_benchmark(c: &mut Criterion) {
    c.bench_function("flush_200_move_zigzag", |b| {
        b.iter(|| {
            let mut q = build_queue(200);
            let mut state = build_state();
            q.flush(&mut state, black_box(false)).unwrap();
        })
    });
}

criterion_group!(benches, flush_benchmark);
criterion_main!(benches);
