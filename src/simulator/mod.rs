// src/simulator/mod.rs - Simulated cartesian machine and probe pin
pub mod commands;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::config::SimulatorConfig;
use crate::error::MotionError;
use crate::motion::{Axis, LastProbeResult, MotionSystem};
use crate::probe::input::PinReader;

pub use commands::MachineCommands;

const IDLE_POLL: Duration = Duration::from_millis(1);

/// One actuator moving linearly from `origin` to `target` over `duration`
/// starting at `start`. At rest when `duration` is zero.
#[derive(Debug, Clone, Copy)]
struct Actuator {
    origin: f64,
    target: f64,
    start: Instant,
    duration: Duration,
}

impl Actuator {
    fn at_rest(position: f64) -> Self {
        Self {
            origin: position,
            target: position,
            start: Instant::now(),
            duration: Duration::ZERO,
        }
    }

    fn position(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return self.target;
        }
        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.duration {
            return self.target;
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        self.origin + (self.target - self.origin) * t
    }

    fn is_moving(&self, now: Instant) -> bool {
        !self.duration.is_zero() && now.saturating_duration_since(self.start) < self.duration
    }

    fn stop(&mut self, now: Instant) {
        *self = Actuator::at_rest(self.position(now));
    }
}

/// What the probe can touch: a possibly tilted bed below and an optional wall
/// at `wall_x` for straight probes along X.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Surface {
    pub bed_height: f64,
    pub tilt_x: f64,
    pub tilt_y: f64,
    pub wall_x: Option<f64>,
}

impl Surface {
    pub fn bed_z(&self, x: f64, y: f64) -> f64 {
        self.bed_height + self.tilt_x * x + self.tilt_y * y
    }

    pub fn touches(&self, [x, y, z]: [f64; 3]) -> bool {
        z <= self.bed_z(x, y) || self.wall_x.is_some_and(|w| x >= w)
    }
}

#[derive(Debug)]
struct SimState {
    actuators: [Actuator; 3],
    /// Planner position in machine coordinates.
    commanded: [f64; 3],
    /// Work position = machine position - offset.
    offset: [f64; 3],
    absolute: bool,
    machine_next: bool,
    saved_modes: Vec<bool>,
    segmentation: bool,
    last_probe: Option<LastProbeResult>,
    alarm: Option<String>,
    surface: Surface,
    stops: u32,
    moves: u32,
}

/// A cartesian machine whose actuators move in (tokio) real time. Moves are
/// not queued: a new move waits for the previous one to finish.
#[derive(Debug)]
pub struct SimMachine {
    state: Mutex<SimState>,
    forbids_assignment: bool,
}

impl SimMachine {
    pub fn new(config: &SimulatorConfig, forbids_assignment: bool) -> Self {
        let start = config.start;
        tracing::info!("Simulated machine at {:?}, bed at Z{:.3}", start, config.bed_height);
        Self {
            state: Mutex::new(SimState {
                actuators: start.map(Actuator::at_rest),
                commanded: start,
                offset: [0.0; 3],
                absolute: true,
                machine_next: false,
                saved_modes: Vec::new(),
                segmentation: true,
                last_probe: None,
                alarm: None,
                surface: Surface {
                    bed_height: config.bed_height,
                    ..Surface::default()
                },
                stops: 0,
                moves: 0,
            }),
            forbids_assignment,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_surface(&self, surface: Surface) {
        self.state().surface = surface;
    }

    pub fn surface(&self) -> Surface {
        self.state().surface
    }

    /// Where the actuators physically are right now.
    pub fn actuator_positions(&self) -> [f64; 3] {
        let now = Instant::now();
        self.state().actuators.map(|a| a.position(now))
    }

    pub fn in_contact(&self) -> bool {
        let now = Instant::now();
        let state = self.state();
        state.surface.touches(state.actuators.map(|a| a.position(now)))
    }

    pub fn work_positions(&self) -> [f64; 3] {
        let state = self.state();
        [0, 1, 2].map(|i| state.commanded[i] - state.offset[i])
    }

    /// `G92`: make the current position read as `value` on `axis`.
    pub fn set_work_position(&self, axis: Axis, value: f64) {
        let mut state = self.state();
        let i = axis.index();
        state.offset[i] = state.commanded[i] - value;
        tracing::debug!("Work position {} set to {:.4}", axis.letter(), value);
    }

    pub fn is_absolute(&self) -> bool {
        self.state().absolute
    }

    pub fn segmentation_enabled(&self) -> bool {
        self.state().segmentation
    }

    pub fn alarm(&self) -> Option<String> {
        self.state().alarm.clone()
    }

    pub fn clear_alarm(&self) {
        if let Some(reason) = self.state().alarm.take() {
            tracing::info!("Alarm cleared: {}", reason);
        }
    }

    /// Number of `stop_all` calls so far.
    pub fn stop_count(&self) -> u32 {
        self.state().stops
    }

    /// Number of moves started so far.
    pub fn move_count(&self) -> u32 {
        self.state().moves
    }

    fn busy(&self) -> bool {
        let now = Instant::now();
        self.state().actuators.iter().any(|a| a.is_moving(now))
    }

    /// Start every actuator towards `target`, all finishing together at
    /// `feedrate` along the longest path.
    fn start_move(&self, target: [f64; 3], feedrate: f64) -> Result<(), MotionError> {
        if feedrate <= 0.0 {
            return Err(MotionError::Rejected(format!("feedrate {} must be > 0", feedrate)));
        }
        let now = Instant::now();
        let mut state = self.state();
        if let Some(reason) = &state.alarm {
            return Err(MotionError::Halted(reason.clone()));
        }
        let from = state.actuators.map(|a| a.position(now));
        let distance = from
            .iter()
            .zip(&target)
            .map(|(a, b)| (b - a).powi(2))
            .sum::<f64>()
            .sqrt();
        if distance < 1e-9 {
            state.commanded = target;
            return Ok(());
        }
        let duration = Duration::try_from_secs_f64(distance / feedrate).map_err(|e| {
            MotionError::Rejected(format!("{:.3}mm at {}mm/s: {}", distance, feedrate, e))
        })?;
        state.commanded = target;
        for (i, actuator) in state.actuators.iter_mut().enumerate() {
            *actuator = Actuator {
                origin: from[i],
                target: target[i],
                start: now,
                duration,
            };
        }
        state.moves += 1;
        tracing::trace!("Move {:?} -> {:?} over {:?}", from, target, duration);
        Ok(())
    }
}

#[async_trait]
impl MotionSystem for SimMachine {
    fn actuator_position(&self, axis: Axis) -> f64 {
        self.state().actuators[axis.index()].position(Instant::now())
    }

    fn is_moving(&self, axis: Axis) -> bool {
        self.state().actuators[axis.index()].is_moving(Instant::now())
    }

    fn stop_all(&self) {
        let now = Instant::now();
        let mut state = self.state();
        for actuator in state.actuators.iter_mut() {
            actuator.stop(now);
        }
        state.stops += 1;
    }

    fn axis_positions(&self) -> [f64; 3] {
        self.state().commanded
    }

    async fn delta_move(&self, delta: [f64; 3], feedrate: f64) -> Result<(), MotionError> {
        self.wait_for_idle().await;
        let from = self.state().commanded;
        self.start_move([0, 1, 2].map(|i| from[i] + delta[i]), feedrate)
    }

    async fn coordinated_move(
        &self,
        target: [Option<f64>; 3],
        feedrate: f64,
    ) -> Result<(), MotionError> {
        self.wait_for_idle().await;
        let resolved = {
            let mut state = self.state();
            let machine = std::mem::take(&mut state.machine_next);
            let mut resolved = state.commanded;
            for (i, value) in target.iter().enumerate() {
                let Some(v) = value else { continue };
                resolved[i] = match (state.absolute, machine) {
                    (false, _) => state.commanded[i] + v,
                    (true, true) => *v,
                    (true, false) => v + state.offset[i],
                };
            }
            resolved
        };
        self.start_move(resolved, feedrate)
    }

    async fn wait_for_idle(&self) {
        while self.busy() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    fn push_state(&self) {
        let mut state = self.state();
        let absolute = state.absolute;
        state.saved_modes.push(absolute);
    }

    fn pop_state(&self) {
        let mut state = self.state();
        if let Some(absolute) = state.saved_modes.pop() {
            state.absolute = absolute;
        }
        state.machine_next = false;
    }

    fn set_absolute_mode(&self, absolute: bool) {
        self.state().absolute = absolute;
    }

    fn use_machine_coordinates_next(&self) {
        self.state().machine_next = true;
    }

    fn set_segmentation_enabled(&self, enabled: bool) {
        self.state().segmentation = enabled;
    }

    fn reset_position_from_actuators(&self) {
        let now = Instant::now();
        let mut state = self.state();
        state.commanded = state.actuators.map(|a| a.position(now));
    }

    fn set_last_probe_result(&self, result: LastProbeResult) {
        self.state().last_probe = Some(result);
    }

    fn last_probe_result(&self) -> Option<LastProbeResult> {
        self.state().last_probe
    }

    fn halt(&self, reason: &str) {
        tracing::error!("ALARM: {}", reason);
        let now = Instant::now();
        let mut state = self.state();
        for actuator in state.actuators.iter_mut() {
            actuator.stop(now);
        }
        state.alarm = Some(reason.to_string());
    }

    fn forbids_direct_axis_assignment(&self) -> bool {
        self.forbids_assignment
    }
}

/// Probe pin that reads the simulated machine's contact with its surface.
/// `force` holds it triggered regardless of position.
pub struct SimProbePin {
    machine: Arc<SimMachine>,
    forced: AtomicBool,
}

impl SimProbePin {
    pub fn new(machine: Arc<SimMachine>) -> Self {
        Self {
            machine,
            forced: AtomicBool::new(false),
        }
    }

    pub fn force(&self, triggered: bool) {
        self.forced.store(triggered, Ordering::Release);
    }
}

impl PinReader for SimProbePin {
    fn read_raw(&self) -> bool {
        self.forced.load(Ordering::Acquire) || self.machine.in_contact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SimMachine {
        SimMachine::new(&SimulatorConfig::default(), false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_takes_time() {
        let sim = machine();
        sim.delta_move([0.0, 0.0, -4.0], 2.0).await.unwrap();
        assert!(sim.is_moving(Axis::Z));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!((sim.actuator_position(Axis::Z) - 8.0).abs() < 1e-6);
        sim.wait_for_idle().await;
        assert!(!sim.is_moving(Axis::Z));
        assert!((sim.actuator_position(Axis::Z) - 6.0).abs() < 1e-9);
        assert_eq!(sim.axis_positions(), [0.0, 0.0, 6.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_planner_ahead() {
        let sim = machine();
        sim.delta_move([0.0, 0.0, -10.0], 5.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        sim.stop_all();
        assert!(!sim.is_moving(Axis::Z));
        assert!((sim.actuator_position(Axis::Z) - 8.0).abs() < 1e-6);
        assert_eq!(sim.axis_positions()[2], 0.0);
        sim.reset_position_from_actuators();
        assert!((sim.axis_positions()[2] - 8.0).abs() < 1e-6);
        assert_eq!(sim.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_offsets_and_machine_moves() {
        let sim = machine();
        sim.set_work_position(Axis::Z, 0.0);
        assert_eq!(sim.work_positions()[2], 0.0);
        // Work Z2 is machine Z12.
        sim.coordinated_move([None, None, Some(2.0)], 50.0).await.unwrap();
        sim.wait_for_idle().await;
        assert!((sim.actuator_position(Axis::Z) - 12.0).abs() < 1e-9);

        sim.use_machine_coordinates_next();
        sim.coordinated_move([Some(5.0), None, Some(2.0)], 50.0).await.unwrap();
        sim.wait_for_idle().await;
        assert_eq!(sim.axis_positions(), [5.0, 0.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_rejects_moves_until_cleared() {
        let sim = machine();
        sim.halt("Probe fail");
        assert_eq!(sim.alarm().as_deref(), Some("Probe fail"));
        let err = sim.delta_move([1.0, 0.0, 0.0], 10.0).await.unwrap_err();
        assert!(matches!(err, MotionError::Halted(_)));
        sim.clear_alarm();
        assert!(sim.delta_move([1.0, 0.0, 0.0], 10.0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_move_time_rejected() {
        let sim = machine();
        let err = sim.delta_move([0.0, 0.0, -5.0], 1e-24).await.unwrap_err();
        assert!(matches!(err, MotionError::Rejected(_)));
        let err = sim
            .coordinated_move([Some(f64::INFINITY), None, None], 50.0)
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::Rejected(_)));
        assert_eq!(sim.axis_positions(), [0.0, 0.0, 10.0]);
        assert_eq!(sim.move_count(), 0);
        assert!(!sim.is_moving(Axis::Z));
    }

    #[test]
    fn test_surface_contact() {
        let surface = Surface {
            bed_height: 1.0,
            tilt_x: 0.01,
            wall_x: Some(30.0),
            ..Surface::default()
        };
        assert!(surface.touches([0.0, 0.0, 1.0]));
        assert!(!surface.touches([0.0, 0.0, 1.5]));
        assert!(surface.touches([100.0, 0.0, 1.5]));
        assert!(!surface.touches([20.0, 0.0, 5.0]));
    }
}
