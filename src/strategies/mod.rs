// src/strategies/mod.rs - Pluggable leveling and calibration strategies
pub mod delta_calibration;
pub mod delta_grid;
pub mod three_point;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::gcode::{CommandOutput, GCode};
use crate::probe::router::{CALIBRATION_SLOT, LEVELING_SLOT};
use crate::probe::sequencer::ProbeSequencer;

pub use delta_calibration::DeltaCalibrationStrategy;
pub use delta_grid::DeltaGridStrategy;
pub use three_point::ThreePointStrategy;

/// A leveling or calibration algorithm driven by probe commands.
///
/// Strategies only probe through the [`ProbeSequencer`]; they never touch the
/// poller or the pin.
#[async_trait]
pub trait ZProbeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read this strategy's settings table. `false` means the strategy cannot run.
    fn configure(&mut self, settings: &toml::Table) -> bool;

    /// `true` if the command was recognised and executed. Failures are written
    /// to `out`.
    async fn handle_command(&mut self, cmd: &GCode, out: &mut CommandOutput) -> bool;

    /// Codes outside the probe family that should be routed to this strategy.
    fn claimed_commands(&self) -> &'static [(char, u16)] {
        &[]
    }
}

/// The known strategies, keyed by their configuration selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    ThreePoint,
    DeltaGrid,
    DeltaCalibration,
}

impl StrategyKind {
    pub fn selector(self) -> &'static str {
        match self {
            StrategyKind::ThreePoint => "three point",
            StrategyKind::DeltaGrid => "delta grid",
            StrategyKind::DeltaCalibration => "delta",
        }
    }

    /// The router slot this kind may occupy.
    pub fn slot(self) -> usize {
        match self {
            StrategyKind::ThreePoint | StrategyKind::DeltaGrid => LEVELING_SLOT,
            StrategyKind::DeltaCalibration => CALIBRATION_SLOT,
        }
    }

    pub fn build(self, sequencer: Arc<ProbeSequencer>) -> Box<dyn ZProbeStrategy> {
        match self {
            StrategyKind::ThreePoint => Box::new(ThreePointStrategy::new(sequencer)),
            StrategyKind::DeltaGrid => Box::new(DeltaGridStrategy::new(sequencer)),
            StrategyKind::DeltaCalibration => Box::new(DeltaCalibrationStrategy::new(sequencer)),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "three point" => Ok(StrategyKind::ThreePoint),
            "delta grid" => Ok(StrategyKind::DeltaGrid),
            "delta" => Ok(StrategyKind::DeltaCalibration),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

/// Build and configure the strategy named by `selector` for `slot`. Every
/// failure is logged and leaves the slot empty.
pub fn load_strategy(
    selector: &str,
    slot: usize,
    settings: &toml::Table,
    sequencer: &Arc<ProbeSequencer>,
) -> Option<Box<dyn ZProbeStrategy>> {
    let kind = match selector.parse::<StrategyKind>() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::error!("config-zprobe: {}", e);
            return None;
        }
    };
    if kind.slot() != slot {
        tracing::error!("config-zprobe: strategy '{}' cannot be used in slot {}", kind, slot);
        return None;
    }
    let mut strategy = kind.build(Arc::clone(sequencer));
    if !strategy.configure(settings) {
        tracing::error!("config-zprobe: failed to load {} strategy", kind);
        return None;
    }
    tracing::info!("config-zprobe: loaded {} strategy", kind);
    Some(strategy)
}

pub(crate) fn setting_f64(settings: &toml::Table, key: &str, default: f64) -> Option<f64> {
    match settings.get(key) {
        None => Some(default),
        Some(toml::Value::Float(v)) => Some(*v),
        Some(toml::Value::Integer(v)) => Some(*v as f64),
        Some(other) => {
            tracing::error!("strategy setting '{}' must be a number, got {}", key, other);
            None
        }
    }
}

pub(crate) fn setting_point(
    settings: &toml::Table,
    key: &str,
    default: (f64, f64),
) -> Option<(f64, f64)> {
    let Some(value) = settings.get(key) else {
        return Some(default);
    };
    let coords: Option<Vec<f64>> = value.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .collect()
    });
    match coords.as_deref() {
        Some([x, y]) => Some((*x, *y)),
        _ => {
            tracing::error!("strategy setting '{}' must be [x, y], got {}", key, value);
            None
        }
    }
}

/// Surface height under each point in machine Z: lift to the probe height,
/// then probe each point in turn. A point that does not trigger fails the run.
pub(crate) async fn probe_surface(
    sequencer: &ProbeSequencer,
    points: &[(f64, f64)],
) -> Result<Vec<f64>, ProbeError> {
    let settings = sequencer.tunables().await;
    sequencer
        .move_z(settings.probe_height, settings.fast_feedrate, false)
        .await?;
    let mut heights = Vec::with_capacity(points.len());
    for &(x, y) in points {
        let outcome = sequencer.probe_at(x, y).await?;
        if !outcome.triggered {
            return Err(ProbeError::NotTriggered { x, y });
        }
        let z = settings.probe_height - outcome.traveled;
        tracing::debug!("Probed X{:.3} Y{:.3}: Z{:.4}", x, y, z);
        heights.push(z);
    }
    Ok(heights)
}
