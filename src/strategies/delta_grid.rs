// src/strategies/delta_grid.rs - Height map over a round bed
use std::sync::Arc;

use async_trait::async_trait;

use crate::gcode::{CommandOutput, GCode};
use crate::probe::sequencer::ProbeSequencer;
use crate::strategies::{ZProbeStrategy, probe_surface, setting_f64};

const DEFAULT_RADIUS: f64 = 50.0;
const DEFAULT_GRID_SIZE: usize = 7;

/// Square grid of heights relative to the bed centre, `size` x `size` nodes
/// spanning `[-radius, radius]` on both axes. Row-major, Y outer.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    size: usize,
    radius: f64,
    heights: Vec<f64>,
}

impl HeightGrid {
    pub fn new(size: usize, radius: f64, heights: Vec<f64>) -> Option<Self> {
        (size >= 2 && heights.len() == size * size && radius > 0.0).then_some(Self {
            size,
            radius,
            heights,
        })
    }

    fn step(&self) -> f64 {
        2.0 * self.radius / (self.size - 1) as f64
    }

    pub fn height(&self, ix: usize, iy: usize) -> f64 {
        self.heights[iy * self.size + ix]
    }

    /// Bilinear interpolation, clamped to the grid edge.
    pub fn interpolate(&self, x: f64, y: f64) -> f64 {
        let step = self.step();
        let locate = |v: f64| {
            let f = (v.clamp(-self.radius, self.radius) + self.radius) / step;
            let i = (f.floor() as usize).min(self.size - 2);
            (i, f - i as f64)
        };
        let (ix, tx) = locate(x);
        let (iy, ty) = locate(y);
        let z00 = self.height(ix, iy);
        let z10 = self.height(ix + 1, iy);
        let z01 = self.height(ix, iy + 1);
        let z11 = self.height(ix + 1, iy + 1);
        let bottom = z00 + (z10 - z00) * tx;
        let top = z01 + (z11 - z01) * tx;
        bottom + (top - bottom) * ty
    }
}

pub struct DeltaGridStrategy {
    sequencer: Arc<ProbeSequencer>,
    radius: f64,
    grid_size: usize,
    grid: Option<HeightGrid>,
}

impl DeltaGridStrategy {
    pub fn new(sequencer: Arc<ProbeSequencer>) -> Self {
        Self {
            sequencer,
            radius: DEFAULT_RADIUS,
            grid_size: DEFAULT_GRID_SIZE,
            grid: None,
        }
    }

    pub fn grid(&self) -> Option<&HeightGrid> {
        self.grid.as_ref()
    }

    /// Z compensation at `(x, y)`; zero while no grid is stored.
    pub fn adjust_z(&self, x: f64, y: f64) -> f64 {
        self.grid.as_ref().map_or(0.0, |g| g.interpolate(x, y))
    }

    fn node(&self, ix: usize, iy: usize) -> (f64, f64) {
        let step = 2.0 * self.radius / (self.grid_size - 1) as f64;
        (-self.radius + ix as f64 * step, -self.radius + iy as f64 * step)
    }

    /// Grid indices of the nodes inside the bed radius, centre first.
    fn reachable_nodes(&self) -> Vec<(usize, usize)> {
        let centre = self.grid_size / 2;
        let limit = self.radius * self.radius + 1e-6;
        let mut nodes = vec![(centre, centre)];
        for iy in 0..self.grid_size {
            for ix in 0..self.grid_size {
                let (x, y) = self.node(ix, iy);
                if (ix, iy) != (centre, centre) && x * x + y * y <= limit {
                    nodes.push((ix, iy));
                }
            }
        }
        nodes
    }

    /// Probe every reachable node. Nodes off the bed take the value of the
    /// nearest probed node.
    async fn probe_grid(&self, out: &mut CommandOutput) -> Option<HeightGrid> {
        let nodes = self.reachable_nodes();
        let points: Vec<(f64, f64)> = nodes.iter().map(|&(ix, iy)| self.node(ix, iy)).collect();
        let measured = match probe_surface(&self.sequencer, &points).await {
            Ok(heights) => heights,
            Err(e) => {
                tracing::warn!("Delta grid probe failed: {}", e);
                out.line(format!("error:{}", e));
                return None;
            }
        };
        let centre_z = measured[0];

        let n = self.grid_size;
        let mut heights = vec![0.0; n * n];
        for iy in 0..n {
            for ix in 0..n {
                let (x, y) = self.node(ix, iy);
                let nearest = points
                    .iter()
                    .zip(&measured)
                    .min_by(|(a, _), (b, _)| {
                        let da = (a.0 - x).powi(2) + (a.1 - y).powi(2);
                        let db = (b.0 - x).powi(2) + (b.1 - y).powi(2);
                        da.total_cmp(&db)
                    })
                    .map_or(centre_z, |(_, z)| *z);
                heights[iy * n + ix] = nearest - centre_z;
            }
        }
        let grid = HeightGrid::new(n, self.radius, heights)?;
        for iy in (0..n).rev() {
            let row: Vec<String> = (0..n)
                .map(|ix| format!("{:8.4}", grid.height(ix, iy)))
                .collect();
            out.line(row.join(" "));
        }
        Some(grid)
    }
}

#[async_trait]
impl ZProbeStrategy for DeltaGridStrategy {
    fn name(&self) -> &'static str {
        "delta grid"
    }

    fn configure(&mut self, settings: &toml::Table) -> bool {
        let Some(radius) = setting_f64(settings, "radius", DEFAULT_RADIUS) else {
            return false;
        };
        let Some(size) = setting_f64(settings, "grid_size", DEFAULT_GRID_SIZE as f64) else {
            return false;
        };
        if radius <= 0.0 {
            tracing::error!("delta grid: radius must be > 0");
            return false;
        }
        if size < 3.0 || size.fract() != 0.0 || size as usize % 2 == 0 {
            tracing::error!("delta grid: grid_size must be an odd integer >= 3");
            return false;
        }
        self.radius = radius;
        self.grid_size = size as usize;
        true
    }

    async fn handle_command(&mut self, cmd: &GCode, out: &mut CommandOutput) -> bool {
        match (cmd.letter(), cmd.code()) {
            ('G', 29) => {
                self.probe_grid(out).await;
            }
            ('G', 31) => {
                // Probe against the bare bed, not the previous map.
                self.grid = None;
                if let Some(grid) = self.probe_grid(out).await {
                    tracing::info!("Delta grid stored ({}x{})", self.grid_size, self.grid_size);
                    self.grid = Some(grid);
                    out.line("Grid stored");
                }
            }
            ('M', 370) => {
                self.grid = None;
                tracing::info!("Delta grid cleared");
            }
            _ => return false,
        }
        true
    }

    fn claimed_commands(&self) -> &'static [(char, u16)] {
        &[('M', 370)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation() {
        // 3x3 over [-10, 10], rising 0.1 per node in X.
        let heights = vec![0.0, 0.1, 0.2, 0.0, 0.1, 0.2, 0.0, 0.1, 0.2];
        let grid = HeightGrid::new(3, 10.0, heights).unwrap();
        assert!((grid.interpolate(-10.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((grid.interpolate(0.0, 3.0) - 0.1).abs() < 1e-9);
        assert!((grid.interpolate(5.0, -7.0) - 0.15).abs() < 1e-9);
        // Clamped outside the grid.
        assert!((grid.interpolate(50.0, 0.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_grid_rejects_bad_shape() {
        assert!(HeightGrid::new(3, 10.0, vec![0.0; 8]).is_none());
        assert!(HeightGrid::new(1, 10.0, vec![0.0]).is_none());
    }
}
