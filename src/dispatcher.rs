// src/dispatcher.rs - Routes commands to the handlers registered for their code
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommandError;
use crate::gcode::{CommandOutput, GCode};

/// Something that executes commands for a set of registered codes.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// `Ok(true)` when handled, `Ok(false)` when the command is not this
    /// handler's, `Err` when it was its command and it failed.
    async fn handle(
        &self,
        cmd: &GCode,
        out: &mut CommandOutput,
        dispatcher: &Dispatcher,
    ) -> Result<bool, CommandError>;
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<(char, u16), Vec<Arc<dyn CommandHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, letter: char, code: u16, handler: Arc<dyn CommandHandler>) {
        tracing::debug!("Registered handler for {}{}", letter, code);
        self.handlers
            .entry((letter.to_ascii_uppercase(), code))
            .or_default()
            .push(handler);
    }

    /// Offer `cmd` to its handlers in registration order. Failures are written
    /// to `out` as `error:<message>`; returns whether the command succeeded.
    pub async fn dispatch(&self, cmd: &GCode, out: &mut CommandOutput) -> bool {
        let Some(handlers) = self.handlers.get(&(cmd.letter(), cmd.code())) else {
            tracing::warn!("Unhandled command: {}", cmd);
            out.line(format!("error:Unsupported command {}", cmd.name()));
            return false;
        };
        tracing::debug!("Dispatching {}", cmd);
        for handler in handlers {
            match handler.handle(cmd, out, self).await {
                Ok(true) => return true,
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!("{} failed: {}", cmd.name(), e);
                    out.line(format!("error:{}", e));
                    return false;
                }
            }
        }
        tracing::warn!("No handler accepted {}", cmd);
        out.line(format!("error:Unsupported command {}", cmd.name()));
        false
    }

    pub async fn dispatch_line(&self, line: &str, out: &mut CommandOutput) -> bool {
        match line.parse::<GCode>() {
            Ok(cmd) => self.dispatch(&cmd, out).await,
            Err(e) => {
                tracing::warn!("Failed to parse '{}': {}", line, e);
                out.line(format!("error:{}", e));
                false
            }
        }
    }
}
