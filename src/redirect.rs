//! Redirection planning.
//!
//! A command line carries at most one redirection. The planner honours the first `<`
//! or `>` it meets; anything after that operator's target is dropped, and a second
//! operator there is reported with a warning.

use crate::error::PlanError;
use std::path::PathBuf;
use tracing::warn;

/// Which standard stream of the child gets rebound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `< file`: the file becomes standard input.
    Input,
    /// `> file`: the file becomes standard output and standard error.
    Output,
}

impl Direction {
    fn from_operator(token: &str) -> Option<Self> {
        match token {
            "<" => Some(Direction::Input),
            ">" => Some(Direction::Output),
            _ => None,
        }
    }

    pub fn operator(self) -> &'static str {
        match self {
            Direction::Input => "<",
            Direction::Output => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectionPlan {
    pub direction: Direction,
    pub target: PathBuf,
}

/// Result of splitting a token sequence at its redirection operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Planned {
    pub argv: Vec<String>,
    pub redirection: Option<RedirectionPlan>,
}

/// Split `tokens` into the argument vector and an optional redirection.
///
/// The background marker must already be stripped by the caller.
pub fn plan(tokens: &[String]) -> Result<Planned, PlanError> {
    let Some((index, direction)) = tokens
        .iter()
        .enumerate()
        .find_map(|(i, t)| Direction::from_operator(t).map(|d| (i, d)))
    else {
        return Ok(Planned {
            argv: tokens.to_vec(),
            redirection: None,
        });
    };

    if index == 0 {
        return Err(PlanError::MissingCommand(direction.operator().to_string()));
    }
    let target = tokens
        .get(index + 1)
        .ok_or_else(|| PlanError::MalformedRedirection(direction.operator().to_string()))?;

    let rest = &tokens[index + 2..];
    if let Some(extra) = rest.iter().find(|t| Direction::from_operator(t).is_some()) {
        warn!(
            "only one redirection per command is supported; `{}` applies and `{}` is ignored",
            direction.operator(),
            extra
        );
    } else if !rest.is_empty() {
        warn!("ignoring arguments after the redirection target: {:?}", rest);
    }

    Ok(Planned {
        argv: tokens[..index].to_vec(),
        redirection: Some(RedirectionPlan {
            direction,
            target: PathBuf::from(target),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_operator_keeps_every_token() {
        let planned = plan(&tokens(&["ls", "-l", "/tmp"])).unwrap();
        assert_eq!(planned.argv, tokens(&["ls", "-l", "/tmp"]));
        assert_eq!(planned.redirection, None);
    }

    #[test]
    fn test_output_redirection() {
        let planned = plan(&tokens(&["echo", "hi", ">", "out.txt"])).unwrap();
        assert_eq!(planned.argv, tokens(&["echo", "hi"]));
        assert_eq!(
            planned.redirection,
            Some(RedirectionPlan {
                direction: Direction::Output,
                target: PathBuf::from("out.txt"),
            })
        );
    }

    #[test]
    fn test_input_redirection() {
        let planned = plan(&tokens(&["cat", "<", "in.txt"])).unwrap();
        assert_eq!(planned.argv, tokens(&["cat"]));
        assert_eq!(planned.redirection.unwrap().direction, Direction::Input);
    }

    #[test]
    fn test_first_operator_wins() {
        let planned = plan(&tokens(&["cat", "<", "in.txt", ">", "out.txt"])).unwrap();
        assert_eq!(planned.argv, tokens(&["cat"]));
        let redirection = planned.redirection.unwrap();
        assert_eq!(redirection.direction, Direction::Input);
        assert_eq!(redirection.target, PathBuf::from("in.txt"));

        let planned = plan(&tokens(&["sort", ">", "out.txt", "<", "in.txt"])).unwrap();
        assert_eq!(planned.redirection.unwrap().direction, Direction::Output);
    }

    #[test]
    fn test_missing_target_is_malformed() {
        assert_eq!(
            plan(&tokens(&["echo", "hi", ">"])),
            Err(PlanError::MalformedRedirection(">".into()))
        );
    }

    #[test]
    fn test_operator_without_command() {
        assert_eq!(
            plan(&tokens(&["<", "in.txt"])),
            Err(PlanError::MissingCommand("<".into()))
        );
    }
}
