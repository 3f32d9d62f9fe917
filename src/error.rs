//! Error taxonomy of the shell.
//!
//! Every error here is scoped to the single line being processed: the loop reports it
//! and reads the next line. Only end of input and the `exit` builtin stop the shell.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of an in-process builtin.
#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("{0}: no such file or directory")]
    NotFound(PathBuf),
    #[error("{0}: permission denied")]
    PermissionDenied(PathBuf),
    #[error("{0}: not a directory")]
    NotADirectory(PathBuf),
    #[error("HOME not set")]
    HomeNotSet,
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl BuiltinError {
    /// Classify an I/O error raised while touching `path`.
    pub fn from_path_error(path: PathBuf, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => BuiltinError::NotFound(path),
            io::ErrorKind::PermissionDenied => BuiltinError::PermissionDenied(path),
            io::ErrorKind::NotADirectory => BuiltinError::NotADirectory(path),
            _ => BuiltinError::Io {
                context: "cd",
                source: err,
            },
        }
    }
}

/// The token sequence could not be turned into a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("syntax error: expected a file name after `{0}`")]
    MalformedRedirection(String),
    #[error("syntax error: missing command before `{0}`")]
    MissingCommand(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("syntax error: unterminated quote")]
    UnfinishedQuote,
}

/// An operating system resource needed to run a command was unavailable.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{}: {source}", .path.display())]
    OpenTarget {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot create child process: {0}")]
    Fork(#[source] nix::Error),
    #[error("cannot talk to child process: {0}")]
    Pipe(#[source] io::Error),
    #[error("cannot wait for child process: {0}")]
    Wait(#[source] nix::Error),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{0}: command not found")]
    CommandNotFound(String),
    #[error("{name}: {source}")]
    Exec {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{0:?}: argument contains a NUL byte")]
    InvalidArgument(String),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Anything that can go wrong while processing one line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("{name}: {source}")]
    Builtin {
        name: String,
        #[source]
        source: BuiltinError,
    },
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_errors_are_classified_by_kind() {
        let err = BuiltinError::from_path_error(
            PathBuf::from("/nope"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(matches!(err, BuiltinError::NotFound(_)));

        let err = BuiltinError::from_path_error(
            PathBuf::from("/root"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, BuiltinError::PermissionDenied(_)));
    }

    #[test]
    fn test_launch_errors_render_like_a_shell() {
        let err = ShellError::from(LaunchError::CommandNotFound("frobnicate".into()));
        assert_eq!(err.to_string(), "frobnicate: command not found");

        let err = ShellError::from(PlanError::MalformedRedirection(">".into()));
        assert_eq!(err.to_string(), "syntax error: expected a file name after `>`");
    }
}
