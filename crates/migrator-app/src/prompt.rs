//! Operator confirmation.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

use crate::error::{AppError, AppResult};

/// Yes/no questions put to the operator.
pub trait Prompter: Send + Sync {
    /// Ask `prompt`; an empty answer selects `default`.
    ///
    /// # Errors
    ///
    /// Returns an error when no answer can be read.
    fn ask_bool(&self, prompt: &str, default: bool) -> AppResult<bool>;
}

/// Interpret one answer line. `None` for unrecognised input.
#[must_use]
pub fn parse_answer(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "yes" | "y" | "true" => Some(true),
        "no" | "n" | "false" => Some(false),
        _ => None,
    }
}

/// Ask on `output`, read answers from `input` until one is recognised.
///
/// # Errors
///
/// Returns an error on read or write failure, or when `input` is exhausted.
pub fn ask_bool_with(
    input: &mut impl BufRead,
    output: &mut impl Write,
    prompt: &str,
    default: bool,
) -> AppResult<bool> {
    let io_error = |source| AppError::Io {
        operation: "prompt",
        path: None,
        source,
    };
    loop {
        write!(output, "{prompt}").map_err(io_error)?;
        output.flush().map_err(io_error)?;
        let mut line = String::new();
        if input.read_line(&mut line).map_err(io_error)? == 0 {
            return Err(io_error(io::Error::from(io::ErrorKind::UnexpectedEof)));
        }
        if let Some(answer) = parse_answer(&line, default) {
            return Ok(answer);
        }
        writeln!(output, "Invalid input, try again.\n").map_err(io_error)?;
    }
}

/// Prompts on the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask_bool(&self, prompt: &str, default: bool) -> AppResult<bool> {
        ask_bool_with(&mut io::stdin().lock(), &mut io::stdout(), prompt, default)
    }
}

/// Answers from a fixed list and records every question asked.
///
/// Runs out of answers as an EOF error, like a closed terminal.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    state: Mutex<(VecDeque<bool>, Vec<String>)>,
}

impl ScriptedPrompter {
    /// Prompter giving `answers` in order.
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            state: Mutex::new((answers.into_iter().collect(), Vec::new())),
        }
    }

    /// Questions asked so far.
    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
            .clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask_bool(&self, prompt: &str, _default: bool) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.1.push(prompt.to_string());
        state.0.pop_front().ok_or_else(|| AppError::Io {
            operation: "prompt",
            path: None,
            source: io::Error::from(io::ErrorKind::UnexpectedEof),
        })
    }
}
