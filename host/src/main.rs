//! Demo host binary: loads a printer configuration, builds a `ToolHead` out
//! of it, and streams a G-code file through it, reporting the resulting
//! print-time schedule. This is the minimal external collaborator wiring
//! the motion core assumes (G-code front end, config loader, logging) --
//! a real host would also own the MCU serial link and G-code macro layer.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, FileFormat};

use motion_core::config::{KinematicsType, PrinterConfig};
use motion_core::extruder::DummyExtruder;
use motion_core::homing::{FixedEndstop, HomingSpec};
use motion_core::kinematics::cartesian::CartesianKinematics;
use motion_core::kinematics::corexy::CoreXyKinematics;
use motion_core::kinematics::{DrivenStepper, KinematicsKind};
use motion_core::mcu::SimulatedMcu;
use motion_core::reactor::WallClockReactor;
use motion_core::step_queue::RecordingStepQueue;
use motion_core::stepper::StepperAxis;
use motion_core::toolhead::ToolHead;
use motion_core::{Axis, Position};

mod gcode;

use gcode::{GCodeOperation, GCodeReader};

#[derive(Parser, Debug)]
#[clap(version = env!("TOOL_VERSION"), author = "Lasse Dalegaard <dalegaard@gmail.com>")]
struct Opts {
    /// JSON5 printer configuration (kinematics, steppers, limits).
    #[clap(long = "config_file")]
    config_file: PathBuf,

    /// G-code file to run through the planner.
    gcode_file: PathBuf,
}

fn load_config(path: &PathBuf) -> Result<PrinterConfig> {
    let cfg = Config::builder()
        .add_source(config::File::new(
            path.to_str().context("config path is not valid UTF-8")?,
            FileFormat::Json5,
        ))
        .build()
        .with_context(|| format!("loading {}", path.display()))?;
    cfg.try_deserialize()
        .context("printer configuration did not match the expected shape")
}

fn build_stepper(name: &str, cfg: &motion_core::config::StepperConfig, mcu_freq: f64) -> StepperAxis {
    StepperAxis::new(name, cfg.step_distance, mcu_freq)
        .with_inversion(cfg.invert_step, cfg.invert_dir)
        .with_min_stop_interval(cfg.min_stop_interval)
}

fn build_toolhead(cfg: &PrinterConfig) -> Result<ToolHead> {
    if cfg.steppers.len() < 3 {
        anyhow::bail!("printer configuration needs at least 3 steppers (x/y/z or a/b/z)");
    }
    let limits = cfg.axis_limits();
    let kinematics = match cfg.kinematics {
        KinematicsType::Cartesian => KinematicsKind::Cartesian(CartesianKinematics::new(
            DrivenStepper::new(
                build_stepper(&cfg.steppers[0].name, &cfg.steppers[0], cfg.mcu_freq),
                Box::new(RecordingStepQueue::new(&cfg.steppers[0].name)),
            ),
            DrivenStepper::new(
                build_stepper(&cfg.steppers[1].name, &cfg.steppers[1], cfg.mcu_freq),
                Box::new(RecordingStepQueue::new(&cfg.steppers[1].name)),
            ),
            DrivenStepper::new(
                build_stepper(&cfg.steppers[2].name, &cfg.steppers[2], cfg.mcu_freq),
                Box::new(RecordingStepQueue::new(&cfg.steppers[2].name)),
            ),
            limits,
        )),
        KinematicsType::Corexy => KinematicsKind::CoreXy(CoreXyKinematics::new(
            DrivenStepper::new(
                build_stepper(&cfg.steppers[0].name, &cfg.steppers[0], cfg.mcu_freq),
                Box::new(RecordingStepQueue::new(&cfg.steppers[0].name)),
            ),
            DrivenStepper::new(
                build_stepper(&cfg.steppers[1].name, &cfg.steppers[1], cfg.mcu_freq),
                Box::new(RecordingStepQueue::new(&cfg.steppers[1].name)),
            ),
            DrivenStepper::new(
                build_stepper(&cfg.steppers[2].name, &cfg.steppers[2], cfg.mcu_freq),
                Box::new(RecordingStepQueue::new(&cfg.steppers[2].name)),
            ),
            limits,
        )),
    };

    Ok(ToolHead::new(
        kinematics,
        Box::new(DummyExtruder),
        Box::new(SimulatedMcu::new()),
        Box::new(WallClockReactor::default()),
        cfg.move_limits(),
    ))
}

/// Homes every linear axis against a fixed endstop at its configured
/// `position_endstop`, in X, Y, Z order. G28 in this front end never
/// parses per-axis letters: it always homes everything.
fn home_all(toolhead: &mut ToolHead, cfg: &PrinterConfig) -> Result<()> {
    for (idx, axis) in Axis::XYZ.into_iter().enumerate() {
        let stepper_cfg = &cfg.steppers[idx];
        let spec = HomingSpec {
            axis,
            position_endstop: stepper_cfg.position_endstop,
            position_min: stepper_cfg.position_min,
            position_max: stepper_cfg.position_max,
            approach_speed: stepper_cfg.homing_speed,
            retract_dist: stepper_cfg.homing_retract_dist,
            second_homing_speed: stepper_cfg
                .second_homing_speed
                .unwrap_or(stepper_cfg.homing_speed / 2.0),
        };
        let mut endstop = FixedEndstop {
            trigger_at: stepper_cfg.position_endstop,
        };
        toolhead
            .home(&spec, &mut endstop)
            .with_context(|| format!("homing axis {axis:?}"))?;
    }
    Ok(())
}

fn run_gcode(toolhead: &mut ToolHead, file: &PathBuf, cfg: &PrinterConfig) -> Result<()> {
    let rdr = GCodeReader::new(BufReader::new(
        File::open(file).with_context(|| format!("opening {}", file.display()))?,
    ));

    let mut pos = toolhead.get_position();
    let mut feed_rate = 0.0_f64;
    let mut absolute_e = true;

    for cmd in rdr {
        let cmd = cmd.context("reading gcode")?;
        match cmd.op {
            GCodeOperation::Move { x, y, z, e, f } => {
                if let Some(f) = f {
                    feed_rate = f / 60.0;
                }
                let e_target = match e {
                    Some(e) if absolute_e => e,
                    Some(e) => pos.w + e,
                    None => pos.w,
                };
                let target = Position::new(
                    x.unwrap_or(pos.x),
                    y.unwrap_or(pos.y),
                    z.unwrap_or(pos.z),
                    e_target,
                );
                toolhead.move_(target, feed_rate.max(1.0))?;
                pos = target;
            }
            GCodeOperation::Traditional { letter: 'G', code: 4, params } => {
                let seconds = params.get_number::<f64>('P').map(|ms| ms / 1000.0).unwrap_or(0.0);
                toolhead.dwell(seconds)?;
            }
            GCodeOperation::Traditional { letter: 'G', code: 28, .. } => {
                // No per-axis letter handling: every G28 in this front end
                // re-homes all three linear axes.
                home_all(toolhead, cfg)?;
                pos = toolhead.get_position();
            }
            GCodeOperation::Traditional { letter: 'G', code: 92, params } => {
                let mut next = pos;
                let mut touched = Vec::new();
                if let Some(v) = params.get_number::<f64>('X') {
                    next.x = v;
                    touched.push(Axis::X);
                }
                if let Some(v) = params.get_number::<f64>('Y') {
                    next.y = v;
                    touched.push(Axis::Y);
                }
                if let Some(v) = params.get_number::<f64>('Z') {
                    next.z = v;
                    touched.push(Axis::Z);
                }
                if let Some(v) = params.get_number::<f64>('E') {
                    next.w = v;
                }
                toolhead.set_position(next, &touched);
                pos = next;
            }
            GCodeOperation::Traditional { letter: 'M', code: 82, .. } => {
                absolute_e = true;
            }
            GCodeOperation::Traditional { letter: 'M', code: 83, .. } => {
                absolute_e = false;
            }
            GCodeOperation::Traditional { letter: 'M', code: 84, .. } => {
                toolhead.motor_off()?;
            }
            GCodeOperation::Traditional { letter: 'M', code: 204, params } => {
                if let Some(accel) = params.get_number::<f64>('S').or_else(|| params.get_number::<f64>('T')) {
                    toolhead.set_max_accel(accel);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let cfg = load_config(&opts.config_file)?;
    let mut toolhead = build_toolhead(&cfg)?;

    run_gcode(&mut toolhead, &opts.gcode_file, &cfg)?;
    toolhead.wait_moves()?;

    let stats = toolhead.stats();
    println!("print time: {:.3}s", stats.print_time);
    Ok(())
}
