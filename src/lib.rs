//! Execution core of a small interactive Unix shell.
//!
//! Each input line is tokenized and either handled in-process by a builtin (`help`,
//! `exit`, `pwd`, `cd`) or launched as an external program found through `PATH`. A
//! line may redirect one standard stream with `<` or `>`, and a trailing `&` runs the
//! command in the background.
//!
//! When attached to a terminal the shell does job control the POSIX way: it owns a
//! process group, hands the terminal to each foreground job, ignores keyboard signals
//! itself and restores them in every child. Background jobs are reaped without
//! blocking the loop.
//!
//! The main entry point is [`Shell`], driven by a [`LineSource`].

mod builtin;
pub mod command;
pub mod context;
pub mod env;
pub mod error;
pub mod jobs;
pub mod launcher;
pub mod path;
pub mod redirect;
mod shell;
pub mod tokenizer;

pub use builtin::{BuiltinEntry, Invocation, Registry};
pub use context::ShellContext;
pub use shell::{Interactive, LineSource, Piped, Shell};
