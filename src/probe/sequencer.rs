// src/probe/sequencer.rs - Probing operations: arm, move, wait, reconcile, disarm
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Duration;

use crate::config::ProbeTunables;
use crate::error::{MotionError, ProbeError};
use crate::motion::{Axis, LastProbeResult, MotionSystem};
use crate::probe::input::ProbeInput;
use crate::probe::session::ProbeSession;

/// Result of a Z probe: distance moved towards the surface and whether it touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub traveled: f64,
    pub triggered: bool,
}

/// Result of a straight probe along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisProbe {
    pub position: [f64; 3],
    pub triggered: bool,
}

pub struct ProbeSequencer {
    input: Arc<ProbeInput>,
    session: Arc<ProbeSession>,
    motion: Arc<dyn MotionSystem>,
    tunables: RwLock<ProbeTunables>,
    reverse_z: bool,
    debounce_ticks: u32,
}

impl ProbeSequencer {
    pub fn new(
        input: Arc<ProbeInput>,
        session: Arc<ProbeSession>,
        motion: Arc<dyn MotionSystem>,
        tunables: ProbeTunables,
        reverse_z: bool,
        debounce_ticks: u32,
    ) -> Self {
        Self {
            input,
            session,
            motion,
            tunables: RwLock::new(tunables),
            reverse_z,
            debounce_ticks,
        }
    }

    pub fn input(&self) -> &ProbeInput {
        &self.input
    }

    pub fn session(&self) -> &ProbeSession {
        &self.session
    }

    pub fn motion(&self) -> &Arc<dyn MotionSystem> {
        &self.motion
    }

    pub async fn tunables(&self) -> ProbeTunables {
        *self.tunables.read().await
    }

    pub async fn update_tunables<F>(&self, update: F)
    where
        F: FnOnce(&mut ProbeTunables),
    {
        let mut tunables = self.tunables.write().await;
        update(&mut tunables);
        tracing::info!("Probe parameters updated: {:?}", *tunables);
    }

    pub async fn slow_feedrate(&self) -> f64 {
        self.tunables.read().await.slow_feedrate
    }

    pub async fn fast_feedrate(&self) -> f64 {
        self.tunables.read().await.fast_feedrate
    }

    pub async fn probe_height(&self) -> f64 {
        self.tunables.read().await.probe_height
    }

    pub async fn wait_for_idle(&self) {
        self.motion.wait_for_idle().await;
    }

    /// Probe in Z with a raw actuator move of `max_distance` (twice the
    /// configured max travel when `None`) at `feedrate` mm/s.
    ///
    /// `traveled` is the start minus end actuator position, so it is positive
    /// for a normal downward probe.
    pub async fn run_probe(
        &self,
        feedrate: f64,
        max_distance: Option<f64>,
        reverse: bool,
    ) -> Result<ProbeOutcome, ProbeError> {
        let session = self.session.arm(self.debounce_ticks)?;
        if self.input.read() {
            tracing::warn!("Probe already triggered, not moving");
            return Err(ProbeError::AlreadyTriggered);
        }

        let settings = *self.tunables.read().await;
        let distance = max_distance.unwrap_or(settings.max_travel * 2.0);
        let start = self.motion.actuator_position(Axis::Z);

        if settings.dwell_before_probing > 0.0001 {
            let dwell = Duration::try_from_secs_f64(settings.dwell_before_probing).map_err(|e| {
                self.publish_miss([0.0; 3]);
                MotionError::Rejected(format!("dwell {}s: {}", settings.dwell_before_probing, e))
            })?;
            tokio::time::sleep(dwell).await;
        }

        let downward = !self.reverse_z != reverse;
        let dz = if downward { -distance } else { distance };
        tracing::debug!("Probing Z by {:.3}mm at {:.2}mm/s from {:.3}", dz, feedrate, start);
        if let Err(e) = self.motion.delta_move([0.0, 0.0, dz], feedrate).await {
            self.publish_miss([0.0; 3]);
            return Err(e.into());
        }
        self.motion.wait_for_idle().await;

        let traveled = start - self.motion.actuator_position(Axis::Z);
        let triggered = session.detected();
        self.motion.set_last_probe_result(LastProbeResult {
            position: [0.0, 0.0, traveled],
            triggered,
        });
        drop(session);

        if triggered {
            // The preempted move left the planner ahead of the actuators.
            self.motion.reset_position_from_actuators();
        }
        tracing::info!("Z probe finished: traveled {:.4}mm, triggered {}", traveled, triggered);
        Ok(ProbeOutcome { traveled, triggered })
    }

    /// [`run_probe`](Self::run_probe), then an absolute move back to the start height.
    pub async fn run_probe_return(
        &self,
        feedrate: f64,
        max_distance: Option<f64>,
        reverse: bool,
    ) -> Result<ProbeOutcome, ProbeError> {
        let saved_z = self.motion.axis_positions()[Axis::Z.index()];
        let outcome = self.run_probe(feedrate, max_distance, reverse).await?;
        let rate = self.tunables.read().await.return_rate();
        self.move_z(saved_z, rate, false).await?;
        Ok(outcome)
    }

    /// Straight probe along `axis` by `distance` (relative, machine coordinates)
    /// using a coordinated move. A strict probe that misses halts the machine.
    pub async fn probe_axis(
        &self,
        axis: Axis,
        distance: f64,
        feedrate: f64,
        strict: bool,
    ) -> Result<AxisProbe, ProbeError> {
        let session = self.session.arm(self.debounce_ticks)?;
        if self.input.read() {
            tracing::warn!("Probe already triggered, not moving");
            return Err(ProbeError::AlreadyTriggered);
        }

        // Segmented moves cannot be preempted cleanly.
        self.motion.set_segmentation_enabled(false);
        let mut target = [None; 3];
        target[axis.index()] = Some(distance);
        tracing::debug!(
            "Straight probe along {} by {:.3}mm at {:.2}mm/s",
            axis.letter(),
            distance,
            feedrate
        );
        let moved = self.machine_move(target, feedrate, true).await;
        let triggered = session.detected();
        drop(session);
        self.motion.set_segmentation_enabled(true);
        if let Err(e) = moved {
            self.publish_miss(self.motion.axis_positions());
            return Err(e.into());
        }

        self.motion.reset_position_from_actuators();
        let position = self.motion.axis_positions();
        self.motion.set_last_probe_result(LastProbeResult { position, triggered });

        if strict && !triggered {
            tracing::error!("Strict probe along {} did not trigger, halting", axis.letter());
            self.motion.halt("Probe fail");
        }
        Ok(AxisProbe { position, triggered })
    }

    /// Move to `(x, y)` at the fast feedrate, then probe and return at the slow feedrate.
    pub async fn probe_at(&self, x: f64, y: f64) -> Result<ProbeOutcome, ProbeError> {
        let settings = *self.tunables.read().await;
        self.move_xy(x, y, settings.fast_feedrate, false).await?;
        self.run_probe_return(settings.slow_feedrate, None, false).await
    }

    pub async fn move_xy(
        &self,
        x: f64,
        y: f64,
        feedrate: f64,
        relative: bool,
    ) -> Result<(), MotionError> {
        self.machine_move([Some(x), Some(y), None], feedrate, relative).await
    }

    pub async fn move_z(&self, z: f64, feedrate: f64, relative: bool) -> Result<(), MotionError> {
        self.machine_move([None, None, Some(z)], feedrate, relative).await
    }

    /// A probe that never got to move still leaves a (failed) result behind.
    fn publish_miss(&self, position: [f64; 3]) {
        self.motion.set_last_probe_result(LastProbeResult {
            position,
            triggered: false,
        });
    }

    /// Coordinated move in machine coordinates, waiting for it to finish. The
    /// caller's movement mode is restored whatever the outcome.
    async fn machine_move(
        &self,
        target: [Option<f64>; 3],
        feedrate: f64,
        relative: bool,
    ) -> Result<(), MotionError> {
        self.motion.push_state();
        self.motion.set_absolute_mode(!relative);
        self.motion.use_machine_coordinates_next();
        let result = self.motion.coordinated_move(target, feedrate).await;
        if result.is_ok() {
            self.motion.wait_for_idle().await;
        }
        self.motion.pop_state();
        result
    }
}
