// src/error.rs - Error types shared across the probe subsystem
use thiserror::Error;

/// Failures reported by the motion collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("machine is halted: {0}")]
    Halted(String),
    #[error("move rejected: {0}")]
    Rejected(String),
}

/// Failures of a single probing operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[error("ZProbe triggered before move, aborting command.")]
    AlreadyTriggered,
    #[error("a probing operation is already in progress")]
    SessionActive,
    #[error("ZProbe not triggered at X{x:.3} Y{y:.3}")]
    NotTriggered { x: f64, y: f64 },
    #[error("motion error: {0}")]
    Motion(#[from] MotionError),
}

/// Failures of a probe or calibration command. Every variant is written to the
/// command output by the dispatcher.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("{0}")]
    Probe(#[from] ProbeError),
    #[error("{0}")]
    MissingArgument(String),
    #[error("invalid argument {letter}: {reason}")]
    InvalidArgument { letter: char, reason: String },
    #[error("{0}")]
    Unsupported(String),
    #[error("strategy #{0} not available")]
    StrategyUnavailable(usize),
    #[error("No strategy found to handle {0}")]
    NoStrategy(String),
    #[error("strategy #{index} did not handle {command}")]
    StrategyDeclined { index: usize, command: String },
}
