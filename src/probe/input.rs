// src/probe/input.rs - Polarity-corrected probe pin
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ConfigError;

/// Raw electrical level of the probe pin, supplied by hardware or the simulator.
pub trait PinReader: Send + Sync {
    fn read_raw(&self) -> bool;
}

/// Parsed pin specification such as `P1.28^` or `!PA4`.
///
/// `!` inverts and `^` enables the pull-up; both may appear before or after the
/// name. The literal `nc` means not connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSpec {
    pub name: String,
    pub inverted: bool,
    pub pullup: bool,
}

impl PinSpec {
    pub fn connected(&self) -> bool {
        !self.name.eq_ignore_ascii_case("nc")
    }
}

impl FromStr for PinSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inverted = false;
        let mut pullup = false;
        let mut name = String::new();
        for c in s.trim().chars() {
            match c {
                '!' => inverted = !inverted,
                '^' => pullup = true,
                c if c.is_ascii_alphanumeric() || c == '.' || c == '_' => name.push(c),
                c => {
                    return Err(ConfigError::Invalid(format!(
                        "unexpected character '{}' in pin '{}'",
                        c, s
                    )));
                }
            }
        }
        if name.is_empty() {
            return Err(ConfigError::Invalid(format!("pin '{}' has no name", s)));
        }
        Ok(Self { name, inverted, pullup })
    }
}

impl fmt::Display for PinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.inverted {
            write!(f, "!")?;
        }
        if self.pullup {
            write!(f, "^")?;
        }
        Ok(())
    }
}

/// Logical probe state: raw level XOR configured polarity XOR runtime override.
/// No debouncing here; the contact poller filters edges inside the probing window.
pub struct ProbeInput {
    spec: PinSpec,
    reader: Arc<dyn PinReader>,
    invert_override: AtomicBool,
}

impl ProbeInput {
    pub fn new(spec: PinSpec, reader: Arc<dyn PinReader>) -> Self {
        Self {
            spec,
            reader,
            invert_override: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &PinSpec {
        &self.spec
    }

    /// `true` when the probe reads as triggered.
    pub fn read(&self) -> bool {
        self.reader.read_raw() ^ self.is_inverting()
    }

    pub fn is_inverting(&self) -> bool {
        self.spec.inverted ^ self.invert_override.load(Ordering::Acquire)
    }

    /// Flip the effective polarity when `invert` is set; `false` leaves it as is.
    /// Applying the same override twice restores the original polarity.
    pub fn apply_inversion_override(&self, invert: bool) {
        if invert {
            self.invert_override.fetch_xor(true, Ordering::AcqRel);
            tracing::info!("Probe pin {} inversion now {}", self.spec.name, self.is_inverting());
        }
    }
}
