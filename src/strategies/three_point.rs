// src/strategies/three_point.rs - Bed plane from three probed points
use std::sync::Arc;

use async_trait::async_trait;

use crate::gcode::{CommandOutput, GCode};
use crate::probe::sequencer::ProbeSequencer;
use crate::strategies::{ZProbeStrategy, probe_surface, setting_f64, setting_point};

const DEFAULT_POINTS: [(f64, f64); 3] = [(0.0, 0.0), (100.0, 0.0), (50.0, 100.0)];
const DEFAULT_TOLERANCE: f64 = 0.03;

/// `z = a*x + b*y + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Plane {
    /// Plane through three points, `None` if they are collinear.
    pub fn through(points: [(f64, f64, f64); 3]) -> Option<Self> {
        let [p1, p2, p3] = points;
        let u = (p2.0 - p1.0, p2.1 - p1.1, p2.2 - p1.2);
        let v = (p3.0 - p1.0, p3.1 - p1.1, p3.2 - p1.2);
        let n = (
            u.1 * v.2 - u.2 * v.1,
            u.2 * v.0 - u.0 * v.2,
            u.0 * v.1 - u.1 * v.0,
        );
        if n.2.abs() < 1e-9 {
            return None;
        }
        let a = -n.0 / n.2;
        let b = -n.1 / n.2;
        Some(Self {
            a,
            b,
            c: p1.2 - a * p1.0 - b * p1.1,
        })
    }

    pub fn z_at(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.c
    }
}

pub struct ThreePointStrategy {
    sequencer: Arc<ProbeSequencer>,
    points: [(f64, f64); 3],
    tolerance: f64,
    plane: Option<Plane>,
}

impl ThreePointStrategy {
    pub fn new(sequencer: Arc<ProbeSequencer>) -> Self {
        Self {
            sequencer,
            points: DEFAULT_POINTS,
            tolerance: DEFAULT_TOLERANCE,
            plane: None,
        }
    }

    pub fn points(&self) -> [(f64, f64); 3] {
        self.points
    }

    pub fn plane(&self) -> Option<Plane> {
        self.plane
    }

    /// Z compensation at `(x, y)`; zero while no plane is set.
    pub fn adjust_z(&self, x: f64, y: f64) -> f64 {
        self.plane.map_or(0.0, |p| p.z_at(x, y))
    }

    async fn probe_points(&self, out: &mut CommandOutput) -> Option<Vec<f64>> {
        match probe_surface(&self.sequencer, &self.points).await {
            Ok(heights) => {
                for (i, ((x, y), z)) in self.points.iter().zip(&heights).enumerate() {
                    out.line(format!("Probe point {} at X{:.3} Y{:.3}: Z{:.4}", i + 1, x, y, z));
                }
                Some(heights)
            }
            Err(e) => {
                tracing::warn!("Three point probe failed: {}", e);
                out.line(format!("error:{}", e));
                None
            }
        }
    }

    async fn set_plane(&mut self, out: &mut CommandOutput) {
        // A stale plane would skew the probe moves.
        self.plane = None;
        let Some(heights) = self.probe_points(out).await else {
            return;
        };

        let min = heights.iter().copied().fold(f64::INFINITY, f64::min);
        let max = heights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max - min <= self.tolerance {
            out.line("Bed is level within tolerance, no plane set");
            return;
        }

        let samples = [
            (self.points[0].0, self.points[0].1, heights[0]),
            (self.points[1].0, self.points[1].1, heights[1]),
            (self.points[2].0, self.points[2].1, heights[2]),
        ];
        match Plane::through(samples) {
            Some(plane) => {
                tracing::info!("Bed plane set: {:?}", plane);
                out.line(format!("Plane set: a{:.6} b{:.6} c{:.4}", plane.a, plane.b, plane.c));
                self.plane = Some(plane);
            }
            None => out.line("error:probe points are collinear"),
        }
    }

    fn set_point(&mut self, cmd: &GCode, out: &mut CommandOutput) {
        let index = cmd.arg('P').unwrap_or(0.0);
        if !(0.0..=2.0).contains(&index) || index.fract() != 0.0 {
            out.line("error:point index must be 0, 1 or 2");
            return;
        }
        let point = &mut self.points[index as usize];
        if let Some(x) = cmd.arg('X') {
            point.0 = x;
        }
        if let Some(y) = cmd.arg('Y') {
            point.1 = y;
        }
    }
}

#[async_trait]
impl ZProbeStrategy for ThreePointStrategy {
    fn name(&self) -> &'static str {
        "three point"
    }

    fn configure(&mut self, settings: &toml::Table) -> bool {
        for (i, key) in ["point1", "point2", "point3"].into_iter().enumerate() {
            match setting_point(settings, key, DEFAULT_POINTS[i]) {
                Some(point) => self.points[i] = point,
                None => return false,
            }
        }
        match setting_f64(settings, "tolerance", DEFAULT_TOLERANCE) {
            Some(t) if t >= 0.0 => self.tolerance = t,
            _ => return false,
        }
        true
    }

    async fn handle_command(&mut self, cmd: &GCode, out: &mut CommandOutput) -> bool {
        match (cmd.letter(), cmd.code()) {
            ('G', 29) => {
                self.probe_points(out).await;
            }
            ('G', 32) => self.set_plane(out).await,
            ('M', 557) => self.set_point(cmd, out),
            ('M', 561) => {
                self.plane = None;
                tracing::info!("Bed plane cleared");
            }
            _ => return false,
        }
        true
    }

    fn claimed_commands(&self) -> &'static [(char, u16)] {
        &[('M', 557), ('M', 561)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_through_points() {
        let plane =
            Plane::through([(0.0, 0.0, 0.0), (100.0, 0.0, 1.0), (0.0, 100.0, -0.5)]).unwrap();
        assert!((plane.a - 0.01).abs() < 1e-9);
        assert!((plane.b + 0.005).abs() < 1e-9);
        assert!(plane.c.abs() < 1e-9);
        assert!((plane.z_at(50.0, 50.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_points_have_no_plane() {
        assert!(Plane::through([(0.0, 0.0, 0.0), (1.0, 1.0, 1.0), (2.0, 2.0, 0.0)]).is_none());
    }
}
