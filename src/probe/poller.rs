// src/probe/poller.rs - Periodic contact detection
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::motion::{Axis, MotionSystem};
use crate::probe::input::ProbeInput;
use crate::probe::session::ProbeSession;
use crate::scheduler::SlowTicker;

/// Probe sampling rate when the machine config does not set one.
pub const DEFAULT_POLL_RATE_HZ: u32 = 100;

/// Samples the probe on a fixed period while a session is armed and stops
/// every actuator once a debounced contact is seen.
pub struct ContactPoller {
    input: Arc<ProbeInput>,
    session: Arc<ProbeSession>,
    motion: Arc<dyn MotionSystem>,
    rate_hz: u32,
}

impl ContactPoller {
    pub fn new(
        input: Arc<ProbeInput>,
        session: Arc<ProbeSession>,
        motion: Arc<dyn MotionSystem>,
        rate_hz: u32,
    ) -> Self {
        Self {
            input,
            session,
            motion,
            rate_hz: rate_hz.max(1),
        }
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    /// Number of consecutive triggered ticks equivalent to `debounce_ms`.
    pub fn debounce_ticks(&self, debounce_ms: f64) -> u32 {
        if debounce_ms <= 0.0 {
            return 0;
        }
        (debounce_ms * f64::from(self.rate_hz) / 1000.0).ceil() as u32
    }

    /// One poll period. Never blocks.
    pub fn tick(&self) {
        if !self.session.is_armed() || self.session.is_detected() {
            return;
        }

        // A straight probe may move any axis, not just Z.
        if !Axis::ALL.iter().any(|&axis| self.motion.is_moving(axis)) {
            self.session.reset_debounce();
            return;
        }

        if !self.input.read() {
            self.session.reset_debounce();
            return;
        }

        let count = self.session.bump_debounce();
        tracing::trace!("Probe reads triggered ({} ticks)", count);
        if count >= self.session.debounce_ticks() {
            // All actuators: on a delta every tower moves for a Z move.
            self.motion.stop_all();
            self.session.mark_detected();
            tracing::debug!("Probe contact detected, actuators stopped");
        }
    }

    /// Register [`tick`](Self::tick) with the scheduler at this poller's rate.
    pub fn attach(self: &Arc<Self>, ticker: &SlowTicker) -> JoinHandle<()> {
        let poller = Arc::clone(self);
        ticker.attach(self.rate_hz, move || poller.tick())
    }
}
