//! Motion planning and step generation core: the Move model, junction-
//! deviation look-ahead planner, kinematics transforms, homing protocol and
//! print-time pipeline for a 3D-printer host. Wire framing, G-code parsing
//! and the printer configuration file format live in the host binary; this
//! crate only assumes the trait-shaped collaborators they'd provide
//! ([`McuLink`](mcu::McuLink), [`Reactor`](reactor::Reactor),
//! [`ExtruderCollaborator`](extruder::ExtruderCollaborator)).

pub mod config;
pub mod error;
pub mod extruder;
pub mod homing;
pub mod kinematics;
pub mod mcu;
pub mod move_plan;
pub mod queue;
pub mod reactor;
pub mod step_queue;
pub mod stepper;
pub mod toolhead;

pub use error::{MotionError, MotionResult};
pub use move_plan::{Axis, Move, Position};
pub use toolhead::ToolHead;

pub use glam;
