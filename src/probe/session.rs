// src/probe/session.rs - Lock-free state shared by the sequencer and the poller
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::ProbeError;

/// Lifecycle of a probing operation as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    Detected,
}

/// The single probing session of the module.
///
/// `detected` and `debounce` are written by the contact poller while armed.
/// The sequencer arms and disarms, and only reads `detected` after its wait
/// for motion completion has returned.
#[derive(Debug, Default)]
pub struct ProbeSession {
    armed: AtomicBool,
    detected: AtomicBool,
    debounce: AtomicU32,
    debounce_ticks: AtomicU32,
}

impl ProbeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session. Fails without touching the live session if one is armed.
    pub fn arm(&self, debounce_ticks: u32) -> Result<ArmedSession<'_>, ProbeError> {
        if self
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Probe session already armed, rejecting request");
            return Err(ProbeError::SessionActive);
        }
        self.debounce_ticks.store(debounce_ticks, Ordering::Release);
        self.debounce.store(0, Ordering::Release);
        self.detected.store(false, Ordering::Release);
        tracing::debug!("Probe session armed (debounce {} ticks)", debounce_ticks);
        Ok(ArmedSession { session: self })
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        match (self.is_armed(), self.is_detected()) {
            (false, _) => SessionState::Idle,
            (true, false) => SessionState::Armed,
            (true, true) => SessionState::Detected,
        }
    }

    pub(crate) fn debounce_ticks(&self) -> u32 {
        self.debounce_ticks.load(Ordering::Acquire)
    }

    pub(crate) fn reset_debounce(&self) {
        self.debounce.store(0, Ordering::Release);
    }

    /// Count one more triggered tick and return the running total.
    pub(crate) fn bump_debounce(&self) -> u32 {
        self.debounce.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mark_detected(&self) {
        self.detected.store(true, Ordering::Release);
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        self.debounce.store(0, Ordering::Release);
        tracing::debug!("Probe session disarmed");
    }
}

/// Guard for an armed session; dropping it disarms, on every exit path.
#[derive(Debug)]
pub struct ArmedSession<'a> {
    session: &'a ProbeSession,
}

impl ArmedSession<'_> {
    pub fn detected(&self) -> bool {
        self.session.is_detected()
    }
}

impl Drop for ArmedSession<'_> {
    fn drop(&mut self) {
        self.session.disarm();
    }
}
