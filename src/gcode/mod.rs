// src/gcode/mod.rs - Command representation and output sink used by the dispatcher
pub mod parser;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use parser::{GCodeError, parse_line};

/// A parsed command: `letter code[.subcode]` plus single-letter numeric arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct GCode {
    letter: char,
    code: u16,
    subcode: Option<u16>,
    args: BTreeMap<char, f64>,
}

impl GCode {
    pub fn new(letter: char, code: u16) -> Self {
        Self {
            letter: letter.to_ascii_uppercase(),
            code,
            subcode: None,
            args: BTreeMap::new(),
        }
    }

    pub fn with_subcode(mut self, subcode: u16) -> Self {
        self.subcode = Some(subcode);
        self
    }

    pub fn with_arg(mut self, letter: char, value: f64) -> Self {
        self.args.insert(letter.to_ascii_uppercase(), value);
        self
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn subcode(&self) -> Option<u16> {
        self.subcode
    }

    pub fn has_arg(&self, letter: char) -> bool {
        self.args.contains_key(&letter)
    }

    pub fn arg(&self, letter: char) -> Option<f64> {
        self.args.get(&letter).copied()
    }

    pub fn args(&self) -> impl Iterator<Item = (char, f64)> + '_ {
        self.args.iter().map(|(k, v)| (*k, *v))
    }

    /// Command word without arguments, e.g. `G38.2`.
    pub fn name(&self) -> String {
        match self.subcode {
            Some(sub) => format!("{}{}.{}", self.letter, self.code, sub),
            None => format!("{}{}", self.letter, self.code),
        }
    }
}

impl fmt::Display for GCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        for (letter, value) in &self.args {
            write!(f, " {}{}", letter, value)?;
        }
        Ok(())
    }
}

impl FromStr for GCode {
    type Err = GCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s)
    }
}

/// Where a command writes its replies. A null sink discards everything and is
/// used for synthetic commands.
#[derive(Debug, Default, Clone)]
pub struct CommandOutput {
    lines: Vec<String>,
    discard: bool,
}

impl CommandOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn null() -> Self {
        Self {
            lines: Vec::new(),
            discard: true,
        }
    }

    pub fn line(&mut self, text: impl Into<String>) {
        if !self.discard {
            self.lines.push(text.into());
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
