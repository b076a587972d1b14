//! Minimal G-code word reader.
//!
//! Only what the probe commands need: one command word (`G30`, `G38.2`, `M670`)
//! followed by letter/value parameters. Everything after `;` is a comment.

use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;

use super::GCode;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GCodeError {
    #[error("empty command line")]
    Empty,
    #[error("invalid command word '{word}' (at {span:?})")]
    InvalidCommand { word: String, span: Range<usize> },
    #[error("invalid value '{value}' for parameter {letter} (at {span:?})")]
    InvalidValue { letter: char, value: String, span: Range<usize> },
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
}

/// A single `letter value` token with its span in the source line.
#[derive(Debug, Clone, PartialEq)]
struct Word<'a> {
    letter: char,
    value: &'a str,
    span: Range<usize>,
}

/// Splits a line into words, stopping at the first comment.
fn words(src: &str) -> Result<Vec<Word<'_>>, GCodeError> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < len {
        while pos < len && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= len || bytes[pos] == b';' {
            break;
        }
        let start = pos;
        let c = bytes[pos] as char;
        if !c.is_ascii_alphabetic() {
            return Err(GCodeError::UnexpectedCharacter(c));
        }
        pos += 1;
        let value_start = pos;
        while pos < len
            && (bytes[pos].is_ascii_digit() || matches!(bytes[pos], b'.' | b'-' | b'+'))
        {
            pos += 1;
        }
        out.push(Word {
            letter: c.to_ascii_uppercase(),
            value: &src[value_start..pos],
            span: start..pos,
        });
    }
    Ok(out)
}

/// Parse one command line into a [`GCode`].
pub fn parse_line(line: &str) -> Result<GCode, GCodeError> {
    let mut words = words(line)?.into_iter();
    let head = words.next().ok_or(GCodeError::Empty)?;

    let invalid = || GCodeError::InvalidCommand {
        word: format!("{}{}", head.letter, head.value),
        span: head.span.clone(),
    };
    let (code, subcode) = match head.value.split_once('.') {
        Some((code, sub)) => (
            code.parse::<u16>().map_err(|_| invalid())?,
            Some(sub.parse::<u16>().map_err(|_| invalid())?),
        ),
        None => (head.value.parse::<u16>().map_err(|_| invalid())?, None),
    };
    if !matches!(head.letter, 'G' | 'M' | 'T') {
        return Err(invalid());
    }

    let mut args = BTreeMap::new();
    for word in words {
        // A bare letter is a flag and reads as zero.
        let value = if word.value.is_empty() {
            0.0
        } else {
            word.value.parse::<f64>().map_err(|_| GCodeError::InvalidValue {
                letter: word.letter,
                value: word.value.to_string(),
                span: word.span.clone(),
            })?
        };
        args.insert(word.letter, value);
    }

    Ok(GCode {
        letter: head.letter,
        code,
        subcode,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcode_and_args() {
        let cmd = parse_line("G38.2 X10 F100").unwrap();
        assert_eq!(cmd.letter(), 'G');
        assert_eq!(cmd.code(), 38);
        assert_eq!(cmd.subcode(), Some(2));
        assert_eq!(cmd.arg('X'), Some(10.0));
        assert_eq!(cmd.arg('F'), Some(100.0));
        assert!(!cmd.has_arg('Y'));
    }

    #[test]
    fn test_parse_lowercase_and_comment() {
        let cmd = parse_line("m670 s2.5 k50 ; tune probe").unwrap();
        assert_eq!(cmd.letter(), 'M');
        assert_eq!(cmd.code(), 670);
        assert_eq!(cmd.arg('S'), Some(2.5));
        assert_eq!(cmd.arg('K'), Some(50.0));
        assert_eq!(cmd.args().count(), 2);
    }

    #[test]
    fn test_bare_flag_reads_zero() {
        let cmd = parse_line("G30 Z").unwrap();
        assert!(cmd.has_arg('Z'));
        assert_eq!(cmd.arg('Z'), Some(0.0));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_line("   ; only a comment"), Err(GCodeError::Empty));
        assert!(matches!(parse_line("X10"), Err(GCodeError::InvalidCommand { .. })));
        assert!(matches!(
            parse_line("G30 Z1.2.3"),
            Err(GCodeError::InvalidValue { letter: 'Z', .. })
        ));
        assert_eq!(parse_line("G30 #"), Err(GCodeError::UnexpectedCharacter('#')));
    }
}
