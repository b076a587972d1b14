//! # Probe Configuration
//!
//! Settings for the probe module, the machine it runs on, and the
//! per-strategy namespaces.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [machine]
//! kinematics = "cartesian"
//! poll_rate_hz = 100
//!
//! [zprobe]
//! enable = true
//! probe_pin = "P1.28^"
//! slow_feedrate = 5.0
//! fast_feedrate = 100.0
//! max_z = 40.0
//! leveling = "three point"
//!
//! [strategies."three point"]
//! point1 = [10.0, 10.0]
//! point2 = [90.0, 10.0]
//! point3 = [50.0, 90.0]
//! ```
//!
//! Strategy tables are opaque here; each strategy reads its own keys in
//! `ZProbeStrategy::configure`.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub zprobe: ProbeConfig,
    #[serde(default)]
    pub strategies: HashMap<String, toml::Table>,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Settings table for the strategy selected by `selector`, empty if absent.
    pub fn strategy_settings(&self, selector: &str) -> toml::Table {
        self.strategies.get(selector).cloned().unwrap_or_default()
    }
}

/// Machine-level facts the probe depends on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default = "default_kinematics")]
    pub kinematics: String,
    #[serde(default = "default_poll_rate_hz")]
    pub poll_rate_hz: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kinematics: default_kinematics(),
            poll_rate_hz: default_poll_rate_hz(),
        }
    }
}

impl MachineConfig {
    /// Rotary delta machines cannot take a single-axis `G92`.
    pub fn forbids_direct_axis_assignment(&self) -> bool {
        self.kinematics.eq_ignore_ascii_case("rotary_delta")
    }
}

/// The `[zprobe]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_probe_pin")]
    pub probe_pin: String,
    #[serde(default)]
    pub debounce_ms: f64,
    #[serde(default = "default_slow_feedrate")]
    pub slow_feedrate: f64,
    #[serde(default = "default_fast_feedrate")]
    pub fast_feedrate: f64,
    #[serde(default)]
    pub return_feedrate: f64,
    #[serde(default = "default_probe_height")]
    pub probe_height: f64,
    #[serde(default = "default_max_z")]
    pub max_z: f64,
    #[serde(default)]
    pub reverse_z: bool,
    #[serde(default)]
    pub dwell_before_probing: f64,
    #[serde(default)]
    pub leveling: Option<String>,
    #[serde(default)]
    pub calibration: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enable: false,
            probe_pin: default_probe_pin(),
            debounce_ms: 0.0,
            slow_feedrate: default_slow_feedrate(),
            fast_feedrate: default_fast_feedrate(),
            return_feedrate: 0.0,
            probe_height: default_probe_height(),
            max_z: default_max_z(),
            reverse_z: false,
            dwell_before_probing: 0.0,
            leveling: None,
            calibration: None,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let numbers = [
            ("debounce_ms", self.debounce_ms),
            ("slow_feedrate", self.slow_feedrate),
            ("fast_feedrate", self.fast_feedrate),
            ("return_feedrate", self.return_feedrate),
            ("probe_height", self.probe_height),
            ("max_z", self.max_z),
            ("dwell_before_probing", self.dwell_before_probing),
        ];
        if let Some((name, _)) = numbers.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::Invalid(format!("{} must be a finite number", name)));
        }
        if self.debounce_ms < 0.0 {
            return Err(ConfigError::Invalid("debounce_ms must be >= 0".to_string()));
        }
        if self.slow_feedrate <= 0.0 || self.fast_feedrate <= 0.0 {
            return Err(ConfigError::Invalid("probe feedrates must be > 0".to_string()));
        }
        if self.return_feedrate < 0.0 {
            return Err(ConfigError::Invalid("return_feedrate must be >= 0".to_string()));
        }
        if self.max_z < 0.0 {
            return Err(ConfigError::Invalid("max_z must be >= 0".to_string()));
        }
        if self.dwell_before_probing < 0.0 {
            return Err(ConfigError::Invalid("dwell_before_probing must be >= 0".to_string()));
        }
        Ok(())
    }

    pub fn tunables(&self) -> ProbeTunables {
        ProbeTunables {
            slow_feedrate: self.slow_feedrate,
            fast_feedrate: self.fast_feedrate,
            return_feedrate: self.return_feedrate,
            max_travel: self.max_z,
            probe_height: self.probe_height,
            dwell_before_probing: self.dwell_before_probing,
        }
    }
}

/// The part of the probe configuration that `M670` may change at runtime.
/// Feedrates are in mm/s, distances in mm, dwell in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeTunables {
    pub slow_feedrate: f64,
    pub fast_feedrate: f64,
    pub return_feedrate: f64,
    pub max_travel: f64,
    pub probe_height: f64,
    pub dwell_before_probing: f64,
}

impl ProbeTunables {
    /// Explicit return feedrate if set, otherwise twice the slow feedrate
    /// capped at the fast feedrate.
    pub fn return_rate(&self) -> f64 {
        if self.return_feedrate != 0.0 {
            self.return_feedrate
        } else {
            (self.slow_feedrate * 2.0).min(self.fast_feedrate)
        }
    }
}

impl Default for ProbeTunables {
    fn default() -> Self {
        ProbeConfig::default().tunables()
    }
}

/// Initial state of the simulated machine used by the `probe-host` binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_sim_start")]
    pub start: [f64; 3],
    #[serde(default)]
    pub bed_height: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            start: default_sim_start(),
            bed_height: 0.0,
        }
    }
}

// Default value functions
fn default_kinematics() -> String { "cartesian".to_string() }
fn default_poll_rate_hz() -> u32 { 100 }
fn default_probe_pin() -> String { "nc".to_string() }
fn default_slow_feedrate() -> f64 { 5.0 }
fn default_fast_feedrate() -> f64 { 100.0 }
fn default_probe_height() -> f64 { 5.0 }
fn default_max_z() -> f64 { 100.0 }
fn default_sim_start() -> [f64; 3] { [0.0, 0.0, 10.0] }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => {
                config.zprobe.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
