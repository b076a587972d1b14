// src/simulator/commands.rs - Motion commands for the simulated machine
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dispatcher::{CommandHandler, Dispatcher};
use crate::error::{CommandError, ProbeError};
use crate::gcode::{CommandOutput, GCode};
use crate::motion::{Axis, MotionSystem};
use crate::simulator::SimMachine;

const DEFAULT_FEEDRATE: f64 = 50.0;

const MACHINE_COMMANDS: [(char, u16); 7] = [
    ('G', 0),
    ('G', 1),
    ('G', 90),
    ('G', 91),
    ('G', 92),
    ('M', 114),
    ('M', 999),
];

/// `G0`/`G1`, `G90`/`G91`, `G92`, `M114` and `M999` against a [`SimMachine`].
pub struct MachineCommands {
    machine: Arc<SimMachine>,
    /// mm/s, modal like `F`.
    feedrate: Mutex<f64>,
}

impl MachineCommands {
    pub fn new(machine: Arc<SimMachine>) -> Self {
        Self {
            machine,
            feedrate: Mutex::new(DEFAULT_FEEDRATE),
        }
    }

    pub fn register(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        for (letter, code) in MACHINE_COMMANDS {
            dispatcher.add_handler(letter, code, self.clone());
        }
    }

    async fn linear_move(&self, cmd: &GCode) -> Result<(), CommandError> {
        let feedrate = {
            let mut feedrate = self.feedrate.lock().await;
            if let Some(f) = cmd.arg('F') {
                if f <= 0.0 {
                    return Err(CommandError::InvalidArgument {
                        letter: 'F',
                        reason: "feedrate must be > 0".to_string(),
                    });
                }
                *feedrate = f / 60.0;
            }
            *feedrate
        };
        let target = Axis::ALL.map(|axis| cmd.arg(axis.letter()));
        if target.iter().all(Option::is_none) {
            return Ok(());
        }
        self.machine
            .coordinated_move(target, feedrate)
            .await
            .map_err(ProbeError::from)?;
        Ok(())
    }

    fn set_position(&self, cmd: &GCode) {
        let given: Vec<(Axis, f64)> = Axis::ALL
            .iter()
            .filter_map(|&axis| cmd.arg(axis.letter()).map(|v| (axis, v)))
            .collect();
        if given.is_empty() {
            for axis in Axis::ALL {
                self.machine.set_work_position(axis, 0.0);
            }
        }
        for (axis, value) in given {
            self.machine.set_work_position(axis, value);
        }
    }
}

#[async_trait]
impl CommandHandler for MachineCommands {
    async fn handle(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
        _dispatcher: &Dispatcher,
    ) -> Result<bool, CommandError> {
        match (cmd.letter(), cmd.code()) {
            ('G', 0 | 1) => self.linear_move(cmd).await?,
            ('G', 90) => self.machine.set_absolute_mode(true),
            ('G', 91) => self.machine.set_absolute_mode(false),
            ('G', 92) => self.set_position(cmd),
            ('M', 114) => {
                self.machine.wait_for_idle().await;
                let [x, y, z] = self.machine.work_positions();
                out.line(format!("X:{:.3} Y:{:.3} Z:{:.3}", x, y, z));
            }
            ('M', 999) => self.machine.clear_alarm(),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;

    fn setup() -> (Arc<SimMachine>, Dispatcher) {
        let machine = Arc::new(SimMachine::new(&SimulatorConfig::default(), false));
        let mut dispatcher = Dispatcher::new();
        Arc::new(MachineCommands::new(machine.clone())).register(&mut dispatcher);
        (machine, dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_moves_and_position_report() {
        let (_machine, dispatcher) = setup();
        let mut out = CommandOutput::new();
        assert!(dispatcher.dispatch_line("G1 X10 Y5 F3000", &mut out).await);
        assert!(dispatcher.dispatch_line("G91", &mut out).await);
        assert!(dispatcher.dispatch_line("G1 Z-2", &mut out).await);
        assert!(dispatcher.dispatch_line("M114", &mut out).await);
        assert_eq!(out.lines(), ["X:10.000 Y:5.000 Z:8.000"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_g92_sets_work_position() {
        let (machine, dispatcher) = setup();
        let mut out = CommandOutput::new();
        assert!(dispatcher.dispatch_line("G92 Z0", &mut out).await);
        assert_eq!(machine.work_positions(), [0.0, 0.0, 0.0]);
        assert_eq!(machine.axis_positions(), [0.0, 0.0, 10.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moves_fail_while_halted() {
        let (machine, dispatcher) = setup();
        machine.halt("test");
        let mut out = CommandOutput::new();
        assert!(!dispatcher.dispatch_line("G1 X1", &mut out).await);
        assert!(out.contains("halted"));
        assert!(dispatcher.dispatch_line("M999", &mut out).await);
        assert!(machine.alarm().is_none());
    }
}
