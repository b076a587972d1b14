// src/strategies/delta_calibration.rs - Endstop trim and radius report for delta machines
use std::sync::Arc;

use async_trait::async_trait;

use crate::gcode::{CommandOutput, GCode};
use crate::probe::sequencer::ProbeSequencer;
use crate::strategies::{ZProbeStrategy, probe_surface, setting_f64};

const DEFAULT_RADIUS: f64 = 50.0;
/// Tower angles in degrees, X, Y, Z.
const TOWER_ANGLES: [f64; 3] = [210.0, 330.0, 90.0];

/// One calibration pass: surface height near each tower and at the centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaSurvey {
    pub towers: [f64; 3],
    pub centre: f64,
}

impl DeltaSurvey {
    /// Tower heights shifted so the lowest is zero.
    pub fn endstop_trims(&self) -> [f64; 3] {
        let min = self.towers.iter().copied().fold(f64::INFINITY, f64::min);
        self.towers.map(|z| z - min)
    }

    /// Centre height minus the mean tower height. Non-zero means the delta
    /// radius is off.
    pub fn centre_deviation(&self) -> f64 {
        self.centre - self.towers.iter().sum::<f64>() / 3.0
    }
}

pub struct DeltaCalibrationStrategy {
    sequencer: Arc<ProbeSequencer>,
    radius: f64,
}

impl DeltaCalibrationStrategy {
    pub fn new(sequencer: Arc<ProbeSequencer>) -> Self {
        Self {
            sequencer,
            radius: DEFAULT_RADIUS,
        }
    }

    pub fn tower_points(&self) -> [(f64, f64); 3] {
        TOWER_ANGLES.map(|deg: f64| {
            let rad = deg.to_radians();
            (self.radius * rad.cos(), self.radius * rad.sin())
        })
    }

    async fn survey(&self, out: &mut CommandOutput) -> Option<DeltaSurvey> {
        let [t1, t2, t3] = self.tower_points();
        match probe_surface(&self.sequencer, &[t1, t2, t3, (0.0, 0.0)]).await {
            Ok(z) => Some(DeltaSurvey {
                towers: [z[0], z[1], z[2]],
                centre: z[3],
            }),
            Err(e) => {
                tracing::warn!("Delta calibration probe failed: {}", e);
                out.line(format!("error:{}", e));
                None
            }
        }
    }
}

#[async_trait]
impl ZProbeStrategy for DeltaCalibrationStrategy {
    fn name(&self) -> &'static str {
        "delta"
    }

    fn configure(&mut self, settings: &toml::Table) -> bool {
        match setting_f64(settings, "radius", DEFAULT_RADIUS) {
            Some(r) if r > 0.0 => {
                self.radius = r;
                true
            }
            _ => false,
        }
    }

    async fn handle_command(&mut self, cmd: &GCode, out: &mut CommandOutput) -> bool {
        match (cmd.letter(), cmd.code()) {
            ('G', 31) => {
                if let Some(s) = self.survey(out).await {
                    out.line(format!(
                        "T1-Z:{:.4} T2-Z:{:.4} T3-Z:{:.4} C-Z:{:.4}",
                        s.towers[0], s.towers[1], s.towers[2], s.centre
                    ));
                }
            }
            ('G', 32) => {
                if let Some(s) = self.survey(out).await {
                    let [x, y, z] = s.endstop_trims();
                    tracing::info!("Delta survey: {:?}", s);
                    out.line(format!("Endstop trims X{:.4} Y{:.4} Z{:.4}", x, y, z));
                    out.line(format!("Centre vs towers: {:.4}", s.centre_deviation()));
                }
            }
            _ => return false,
        }
        true
    }
}
