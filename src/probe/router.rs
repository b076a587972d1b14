// src/probe/router.rs - Probe and calibration command surface
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dispatcher::{CommandHandler, Dispatcher};
use crate::error::{CommandError, ProbeError};
use crate::gcode::{CommandOutput, GCode};
use crate::motion::Axis;
use crate::probe::sequencer::ProbeSequencer;
use crate::strategies::ZProbeStrategy;

pub const LEVELING_SLOT: usize = 0;
pub const CALIBRATION_SLOT: usize = 1;

/// Codes the router always owns.
const PROBE_COMMANDS: &[(char, u16)] = &[
    ('G', 29),
    ('G', 30),
    ('G', 31),
    ('G', 32),
    ('G', 38),
    ('M', 119),
    ('M', 500),
    ('M', 670),
];

type StrategySlot = Mutex<Option<Box<dyn ZProbeStrategy>>>;

pub struct ProbeCommandRouter {
    sequencer: Arc<ProbeSequencer>,
    /// Indexed by [`LEVELING_SLOT`] and [`CALIBRATION_SLOT`].
    strategies: [StrategySlot; 2],
    claimed: Vec<(char, u16)>,
}

impl ProbeCommandRouter {
    pub fn new(
        sequencer: Arc<ProbeSequencer>,
        leveling: Option<Box<dyn ZProbeStrategy>>,
        calibration: Option<Box<dyn ZProbeStrategy>>,
    ) -> Self {
        let mut claimed = Vec::new();
        for strategy in leveling.iter().chain(calibration.iter()) {
            for &code in strategy.claimed_commands() {
                if !PROBE_COMMANDS.contains(&code) && !claimed.contains(&code) {
                    claimed.push(code);
                }
            }
        }
        Self {
            sequencer,
            strategies: [Mutex::new(leveling), Mutex::new(calibration)],
            claimed,
        }
    }

    /// Every code this router should receive from the dispatcher.
    pub fn command_codes(&self) -> Vec<(char, u16)> {
        PROBE_COMMANDS.iter().chain(self.claimed.iter()).copied().collect()
    }

    pub fn register(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        for (letter, code) in self.command_codes() {
            dispatcher.add_handler(letter, code, self.clone());
        }
    }

    pub async fn has_strategy(&self, slot: usize) -> bool {
        match self.strategies.get(slot) {
            Some(s) => s.lock().await.is_some(),
            None => false,
        }
    }

    /// Feedrate from an `F` argument in mm/min, else the slow probe feedrate.
    async fn feedrate(&self, cmd: &GCode) -> Result<f64, CommandError> {
        match cmd.arg('F') {
            Some(f) if f > 0.0 && f.is_finite() => Ok(f / 60.0),
            Some(_) => Err(CommandError::InvalidArgument {
                letter: 'F',
                reason: "feedrate must be a finite number > 0".to_string(),
            }),
            None => Ok(self.sequencer.slow_feedrate().await),
        }
    }

    async fn probe_family(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
        dispatcher: &Dispatcher,
    ) -> Result<(), CommandError> {
        if self.sequencer.input().read() {
            return Err(ProbeError::AlreadyTriggered.into());
        }
        if cmd.code() == 30 {
            self.simple_probe(cmd, out, dispatcher).await
        } else {
            self.route_to_strategy(cmd, out).await
        }
    }

    /// `G30`: probe down. With `Z` set the position there afterwards instead of
    /// returning to the start height, unless the kinematics forbid it.
    async fn simple_probe(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
        dispatcher: &Dispatcher,
    ) -> Result<(), CommandError> {
        self.sequencer.wait_for_idle().await;

        let set_z = cmd
            .arg('Z')
            .filter(|_| !self.sequencer.motion().forbids_direct_axis_assignment());
        let reverse = cmd.arg('R').is_some_and(|r| r != 0.0);
        let rate = self.feedrate(cmd).await?;

        let outcome = match set_z {
            Some(_) => self.sequencer.run_probe(rate, None, reverse).await?,
            None => self.sequencer.run_probe_return(rate, None, reverse).await?,
        };

        if !outcome.triggered {
            out.line("ZProbe not triggered");
            return Ok(());
        }
        out.line(format!("Z:{:.4}", outcome.traveled));
        if let Some(z) = set_z {
            // Shortcut for G92 Z<z>.
            let g92 = GCode::new('G', 92).with_arg('Z', z);
            let mut sink = CommandOutput::null();
            if !dispatcher.dispatch(&g92, &mut sink).await {
                return Err(CommandError::Unsupported(format!("could not set Z to {:.4}", z)));
            }
        }
        Ok(())
    }

    /// Offer the command to leveling then calibration.
    async fn offer_to_strategies(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
    ) -> Result<(), CommandError> {
        for slot in &self.strategies {
            if let Some(strategy) = slot.lock().await.as_mut() {
                if strategy.handle_command(cmd, out).await {
                    return Ok(());
                }
            }
        }
        Err(CommandError::NoStrategy(cmd.name()))
    }

    /// Like [`offer_to_strategies`](Self::offer_to_strategies), unless `P`
    /// names a single slot.
    async fn route_to_strategy(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
    ) -> Result<(), CommandError> {
        let Some(p) = cmd.arg('P') else {
            return self.offer_to_strategies(cmd, out).await;
        };

        let index = if p == 0.0 {
            LEVELING_SLOT
        } else if p == 1.0 {
            CALIBRATION_SLOT
        } else {
            return Err(CommandError::InvalidArgument {
                letter: 'P',
                reason: "Only P0 and P1 supported".to_string(),
            });
        };
        let mut slot = self.strategies[index].lock().await;
        let strategy = slot.as_mut().ok_or(CommandError::StrategyUnavailable(index))?;
        if strategy.handle_command(cmd, out).await {
            Ok(())
        } else {
            Err(CommandError::StrategyDeclined {
                index,
                command: cmd.name(),
            })
        }
    }

    /// `G38.2` (strict) / `G38.3` (relaxed) straight probe along one axis.
    async fn straight_probe(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
    ) -> Result<(), CommandError> {
        let strict = match cmd.subcode() {
            Some(2) => true,
            Some(3) => false,
            _ => {
                return Err(CommandError::Unsupported(
                    "Only G38.2 and G38.3 are supported".to_string(),
                ));
            }
        };
        let axes: Vec<(Axis, f64)> = Axis::ALL
            .iter()
            .filter_map(|&axis| cmd.arg(axis.letter()).map(|v| (axis, v)))
            .collect();
        let (axis, distance) = match axes.as_slice() {
            [(axis, distance)] => (*axis, *distance),
            _ => {
                return Err(CommandError::MissingArgument(
                    "exactly one of X Y or Z must be specified".to_string(),
                ));
            }
        };
        let rate = self.feedrate(cmd).await?;
        if self.sequencer.input().read() {
            return Err(ProbeError::AlreadyTriggered.into());
        }

        self.sequencer.wait_for_idle().await;
        let result = self.sequencer.probe_axis(axis, distance, rate, strict).await?;
        let [x, y, z] = result.position;
        out.line(format!("[PRB:{:.3},{:.3},{:.3}:{}]", x, y, z, u8::from(result.triggered)));
        if strict && !result.triggered {
            out.line("ALARM: Probe fail");
        }
        Ok(())
    }

    /// `M670`: update the tunables given, leave the rest. `I` toggles pin inversion.
    async fn set_parameters(&self, cmd: &GCode) -> Result<(), CommandError> {
        for letter in ['S', 'K', 'R', 'Z', 'H', 'D', 'I'] {
            if cmd.arg(letter).is_some_and(|v| !v.is_finite()) {
                return Err(CommandError::InvalidArgument {
                    letter,
                    reason: "must be a finite number".to_string(),
                });
            }
        }
        for letter in ['S', 'K'] {
            if cmd.arg(letter).is_some_and(|v| v <= 0.0) {
                return Err(CommandError::InvalidArgument {
                    letter,
                    reason: "feedrate must be > 0".to_string(),
                });
            }
        }
        for letter in ['R', 'Z', 'D'] {
            if cmd.arg(letter).is_some_and(|v| v < 0.0) {
                return Err(CommandError::InvalidArgument {
                    letter,
                    reason: "must be >= 0".to_string(),
                });
            }
        }

        self.sequencer
            .update_tunables(|t| {
                if let Some(v) = cmd.arg('S') {
                    t.slow_feedrate = v;
                }
                if let Some(v) = cmd.arg('K') {
                    t.fast_feedrate = v;
                }
                if let Some(v) = cmd.arg('R') {
                    t.return_feedrate = v;
                }
                if let Some(v) = cmd.arg('Z') {
                    t.max_travel = v;
                }
                if let Some(v) = cmd.arg('H') {
                    t.probe_height = v;
                }
                if let Some(v) = cmd.arg('D') {
                    t.dwell_before_probing = v;
                }
            })
            .await;
        if let Some(i) = cmd.arg('I') {
            // Temporary: not part of the saved parameters.
            self.sequencer.input().apply_inversion_override(i != 0.0);
        }
        Ok(())
    }

    /// `M500`: current tunables as a replayable `M670`.
    async fn save_parameters(&self, out: &mut CommandOutput) {
        let t = self.sequencer.tunables().await;
        out.line(";Probe feedrates Slow/fast(K)/Return (mm/sec) max_z (mm) height (mm) dwell (s):");
        out.line(format!(
            "M670 S{:.2} K{:.2} R{:.2} Z{:.2} H{:.2} D{:.2}",
            t.slow_feedrate,
            t.fast_feedrate,
            t.return_feedrate,
            t.max_travel,
            t.probe_height,
            t.dwell_before_probing
        ));
    }
}

#[async_trait]
impl CommandHandler for ProbeCommandRouter {
    async fn handle(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
        dispatcher: &Dispatcher,
    ) -> Result<bool, CommandError> {
        match (cmd.letter(), cmd.code()) {
            ('G', 29..=32) => self.probe_family(cmd, out, dispatcher).await?,
            ('G', 38) => self.straight_probe(cmd, out).await?,
            ('M', 119) => out.line(format!(" Probe: {}", u8::from(self.sequencer.input().read()))),
            ('M', 670) => self.set_parameters(cmd).await?,
            ('M', 500) => self.save_parameters(out).await,
            code if self.claimed.contains(&code) => self.offer_to_strategies(cmd, out).await?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}
