// src/motion/mod.rs - Contract the probe consumes from the motion subsystem
use async_trait::async_trait;

pub use crate::error::MotionError;

/// Cartesian axes the probe can move along. On Cartesian machines each axis
/// is driven by the actuator with the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    pub fn from_char(c: char) -> Option<Axis> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            _ => None,
        }
    }
}

/// Outcome of the most recent probing operation, kept by the motion subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastProbeResult {
    pub position: [f64; 3],
    pub triggered: bool,
}

/// The motion subsystem as seen by the probe.
///
/// The synchronous methods are called from the contact poller and must not
/// block; `stop_all` has to take effect immediately and be idempotent.
/// `wait_for_idle` must derive completion from actuator motion state so it
/// cannot return before a stop issued on the same tick has landed.
#[async_trait]
pub trait MotionSystem: Send + Sync {
    /// Current position of the actuator driving `axis`, in mm.
    fn actuator_position(&self, axis: Axis) -> f64;
    fn is_moving(&self, axis: Axis) -> bool;
    /// Stop every actuator where it stands.
    fn stop_all(&self);
    /// Commanded cartesian position (the planner's last milestone).
    fn axis_positions(&self) -> [f64; 3];

    /// Raw relative actuator move, bypassing kinematics.
    async fn delta_move(&self, delta: [f64; 3], feedrate: f64) -> Result<(), MotionError>;
    /// Coordinated move honouring the current movement mode. `None` axes stay put.
    async fn coordinated_move(
        &self,
        target: [Option<f64>; 3],
        feedrate: f64,
    ) -> Result<(), MotionError>;
    async fn wait_for_idle(&self);

    fn push_state(&self);
    fn pop_state(&self);
    fn set_absolute_mode(&self, absolute: bool);
    /// The next coordinated move ignores work offsets.
    fn use_machine_coordinates_next(&self);
    fn set_segmentation_enabled(&self, enabled: bool);
    /// Resynchronise the commanded position from where the actuators actually are.
    fn reset_position_from_actuators(&self);

    fn set_last_probe_result(&self, result: LastProbeResult);
    fn last_probe_result(&self) -> Option<LastProbeResult>;

    /// Raise a motion-halting alarm.
    fn halt(&self, reason: &str);
    /// Kinematics where a single axis position cannot be assigned directly.
    fn forbids_direct_axis_assignment(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_conversion() {
        assert_eq!(Axis::from_char('x'), Some(Axis::X));
        assert_eq!(Axis::from_char('Z'), Some(Axis::Z));
        assert_eq!(Axis::from_char('E'), None);
        for axis in Axis::ALL {
            assert_eq!(Axis::from_char(axis.letter()), Some(axis));
        }
        assert_eq!(Axis::Y.index(), 1);
    }
}
