use crate::command::{ExitCode, Flow};
use crate::env::Environment;
use crate::error::BuiltinError;
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "pwd" or "cd".
    fn name() -> &'static str;

    /// Other names the command answers to.
    fn aliases() -> &'static [&'static str] {
        &[]
    }

    /// One-line summary shown by `help`.
    fn description() -> &'static str;

    /// Executes the command against the shell state.
    fn execute(self, inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError>;
}

/// Everything a builtin may touch while it runs.
pub struct Invocation<'a> {
    /// Standard output of the builtin; a file when the line redirects output.
    pub stdout: &'a mut dyn Write,
    pub env: &'a mut Environment,
    pub registry: &'a Registry,
}

type Handler = fn(&[String], &mut Invocation<'_>) -> Result<Flow, BuiltinError>;

/// A registered builtin.
pub struct BuiltinEntry {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    handler: Handler,
}

impl BuiltinEntry {
    fn of<T: BuiltinCommand>() -> Self {
        Self {
            name: T::name(),
            aliases: T::aliases(),
            description: T::description(),
            handler: run::<T>,
        }
    }

    fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }

    /// Run the builtin with `args` (the words after the command name).
    pub fn invoke(&self, args: &[String], inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError> {
        (self.handler)(args, inv)
    }
}

fn run<T: BuiltinCommand>(args: &[String], inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match T::from_args(&[T::name()], &args) {
        Ok(cmd) => cmd.execute(inv),
        Err(EarlyExit { output, status }) => {
            writeln!(inv.stdout, "{}", output.trim_end()).map_err(|source| BuiltinError::Io {
                context: "write",
                source,
            })?;
            let code: ExitCode = if status.is_err() { 1 } else { 0 };
            Ok(Flow::Continue(code))
        }
    }
}

/// Name to handler table for the in-process commands. Immutable once built.
pub struct Registry {
    entries: Vec<BuiltinEntry>,
}

impl Registry {
    pub fn lookup(&self, name: &str) -> Option<&BuiltinEntry> {
        self.entries.iter().find(|entry| entry.answers_to(name))
    }

    pub fn entries(&self) -> impl Iterator<Item = &BuiltinEntry> {
        self.entries.iter()
    }
}

impl Default for Registry {
    /// The standard builtins: `help` (`?`), `exit`, `pwd`, `cd`.
    fn default() -> Self {
        Self {
            entries: vec![
                BuiltinEntry::of::<Help>(),
                BuiltinEntry::of::<Exit>(),
                BuiltinEntry::of::<Pwd>(),
                BuiltinEntry::of::<Cd>(),
            ],
        }
    }
}

fn write_err(context: &'static str) -> impl FnOnce(std::io::Error) -> BuiltinError {
    move |source| BuiltinError::Io { context, source }
}

#[derive(FromArgs)]
/// Show the builtin commands.
pub struct Help {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn aliases() -> &'static [&'static str] {
        &["?"]
    }

    fn description() -> &'static str {
        "show this help menu"
    }

    fn execute(self, inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError> {
        for entry in inv.registry.entries() {
            let mut names = vec![entry.name];
            names.extend_from_slice(entry.aliases);
            writeln!(inv.stdout, "{} - {}", names.join(", "), entry.description)
                .map_err(write_err("help"))?;
        }
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn description() -> &'static str {
        "exit the command shell"
    }

    fn execute(self, _inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError> {
        Ok(Flow::Exit(0))
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn description() -> &'static str {
        "print the current working directory"
    }

    fn execute(self, inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError> {
        let cwd = env::current_dir().map_err(write_err("pwd"))?;
        writeln!(inv.stdout, "{}", cwd.display()).map_err(write_err("pwd"))?;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn description() -> &'static str {
        "change the current working directory"
    }

    fn execute(self, inv: &mut Invocation<'_>) -> Result<Flow, BuiltinError> {
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => PathBuf::from(inv.env.get_var("HOME").ok_or(BuiltinError::HomeNotSet)?),
        };

        let canonical = fs::canonicalize(&target)
            .map_err(|e| BuiltinError::from_path_error(target.clone(), e))?;
        let previous = env::current_dir().ok();

        env::set_current_dir(&canonical)
            .map_err(|e| BuiltinError::from_path_error(target.clone(), e))?;

        if let Some(previous) = previous {
            inv.env.set_var("OLDPWD", previous.to_string_lossy());
        }
        inv.env.set_var("PWD", canonical.to_string_lossy());
        Ok(Flow::Continue(0))
    }
}
