//! Z probe subsystem for a motion-control host: contact polling, probing
//! sequences, probe commands and pluggable leveling/calibration strategies,
//! with a simulated machine to run them against.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gcode;
pub mod motion;
pub mod probe;
pub mod scheduler;
pub mod simulator;
pub mod strategies;

pub use config::{Config, load_config};
pub use dispatcher::{CommandHandler, Dispatcher};
pub use error::{CommandError, MotionError, ProbeError};
pub use gcode::{CommandOutput, GCode};
pub use motion::{Axis, LastProbeResult, MotionSystem};
pub use probe::ZProbe;
