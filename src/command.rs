use crate::error::PlanError;
use crate::redirect::{self, RedirectionPlan};

/// Conventional process exit code type used by this crate.
///
/// 0 is success; anything else is failure. A child killed by a signal reports
/// `128 + signal`, and a command that could not be found reports 127.
pub type ExitCode = i32;

/// Exit code of a command that could not be executed from any candidate path.
pub const NOT_FOUND_EXIT_CODE: ExitCode = 127;

/// Token that sends a command to the background when it ends the line.
pub const BACKGROUND_MARKER: &str = "&";

/// What the loop should do after a line has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue(ExitCode),
    Exit(ExitCode),
}

/// One parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program name followed by its arguments. Never empty.
    pub argv: Vec<String>,
    pub redirection: Option<RedirectionPlan>,
    pub background: bool,
    /// The line as the user typed it, used when reporting jobs.
    pub line: String,
}

impl Command {
    /// Build a command from a non-empty token sequence.
    ///
    /// A trailing `&` sets `background` and is removed before redirection planning.
    pub fn parse(line: &str, tokens: &[String]) -> Result<Self, PlanError> {
        let (tokens, background) = match tokens.split_last() {
            Some((last, rest)) if last == BACKGROUND_MARKER => (rest, true),
            _ => (tokens, false),
        };
        if tokens.is_empty() {
            return Err(PlanError::MissingCommand(BACKGROUND_MARKER.to_string()));
        }
        let planned = redirect::plan(tokens)?;
        Ok(Self {
            argv: planned.argv,
            redirection: planned.redirection,
            background,
            line: line.trim().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}
