use crate::builtin::{Invocation, Registry};
use crate::command::{Command, ExitCode, Flow};
use crate::context::ShellContext;
use crate::env::Environment;
use crate::error::{LaunchError, ResourceError, ShellError};
use crate::jobs::{JobState, JobTable};
use crate::launcher::{ForkLauncher, ProcessLauncher};
use crate::redirect::{Direction, RedirectionPlan};
use crate::tokenizer::tokenize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs::File;
use std::io::{self, BufRead, Write};
use tracing::{debug, error, warn};

/// Where the loop gets its lines from.
pub trait LineSource {
    /// Read the next line, showing `prompt` if the source is interactive.
    ///
    /// Returns `Ok(None)` at end of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Lines typed at a terminal, with in-session history.
pub struct Interactive {
    editor: DefaultEditor,
}

impl Interactive {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for Interactive {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(Some(line))
            }
            // Ctrl-C discards the current line.
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(ReadlineError::Io(err)) => Err(err),
            Err(err) => Err(io::Error::other(err.to_string())),
        }
    }
}

/// Lines read from a pipe or a script file. Never prints a prompt.
pub struct Piped<R> {
    reader: R,
}

impl<R: BufRead> Piped<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for Piped<R> {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        let mut bytes = Vec::new();
        if self.reader.read_until(b'\n', &mut bytes)? == 0 {
            return Ok(None);
        }
        match String::from_utf8(bytes) {
            Ok(line) => Ok(Some(line)),
            Err(err) => {
                warn!("input line is not valid UTF-8; invalid bytes were replaced");
                Ok(Some(String::from_utf8_lossy(err.as_bytes()).into_owned()))
            }
        }
    }
}

/// The read-dispatch loop.
///
/// Owns the shell context, the environment handed to children, the builtin table and
/// the background jobs.
pub struct Shell {
    ctx: ShellContext,
    env: Environment,
    builtins: Registry,
    launcher: Box<dyn ProcessLauncher>,
    jobs: JobTable,
    line_num: usize,
}

impl Shell {
    pub fn new(ctx: ShellContext, env: Environment) -> Self {
        Self::with_launcher(ctx, env, Box::new(ForkLauncher))
    }

    pub fn with_launcher(
        ctx: ShellContext,
        env: Environment,
        launcher: Box<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            ctx,
            env,
            builtins: Registry::default(),
            launcher,
            jobs: JobTable::default(),
            line_num: 0,
        }
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    /// Process lines until end of input or `exit`, and return the shell's exit status.
    pub fn run(&mut self, source: &mut dyn LineSource) -> ExitCode {
        loop {
            self.report_finished_jobs();

            let prompt = format!("{}: ", self.line_num);
            let line = match source.read_line(&prompt) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    error!("cannot read input: {err}");
                    return 1;
                }
            };
            self.line_num += 1;

            match self.execute_line(&line) {
                Ok(Flow::Continue(code)) => debug!(code, "line finished"),
                Ok(Flow::Exit(code)) => {
                    self.report_finished_jobs();
                    return code;
                }
                Err(err) => eprintln!("jobshell: {err}"),
            }
        }

        self.report_finished_jobs();
        0
    }

    /// Run one line with builtin output going to the process stdout.
    pub fn execute_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        let mut stdout = io::stdout();
        let flow = self.execute_line_with_output(line, &mut stdout);
        stdout.flush()?;
        flow
    }

    /// Run one line, writing builtin output to `out`.
    ///
    /// External commands always write to the inherited stdout (or their redirection).
    pub fn execute_line_with_output(
        &mut self,
        line: &str,
        out: &mut dyn Write,
    ) -> Result<Flow, ShellError> {
        let tokens = tokenize(line)?;
        if tokens.is_empty() {
            return Ok(Flow::Continue(0));
        }
        let cmd = Command::parse(line, &tokens)?;

        if self.builtins.lookup(cmd.name()).is_some() {
            return self.run_builtin(&cmd, out);
        }

        let job = self.launcher.spawn(&self.ctx, &self.env, &cmd)?;
        match job.state {
            JobState::Done(code) => Ok(Flow::Continue(code)),
            JobState::Running => {
                let stopped = !cmd.background;
                let job = self.jobs.track(job);
                if stopped {
                    eprintln!("\n[{}]  Continued in background\t{}", job.id, job.command);
                } else {
                    eprintln!("[{}] {}", job.id, job.pid);
                }
                Ok(Flow::Continue(0))
            }
        }
    }

    fn run_builtin(&mut self, cmd: &Command, out: &mut dyn Write) -> Result<Flow, ShellError> {
        let Some(entry) = self.builtins.lookup(cmd.name()) else {
            return Ok(Flow::Continue(0));
        };
        debug!(name = entry.name, "running builtin");

        let mut redirected;
        let stdout: &mut dyn Write = match &cmd.redirection {
            Some(RedirectionPlan {
                direction: Direction::Output,
                target,
            }) => {
                redirected = File::create(target).map_err(|source| open_error(target, source))?;
                &mut redirected
            }
            Some(RedirectionPlan {
                direction: Direction::Input,
                target,
            }) => {
                // Builtins never read stdin, but the file must still exist.
                File::open(target).map_err(|source| open_error(target, source))?;
                out
            }
            None => out,
        };

        let mut inv = Invocation {
            stdout,
            env: &mut self.env,
            registry: &self.builtins,
        };
        let flow = entry
            .invoke(cmd.args(), &mut inv)
            .map_err(|source| ShellError::Builtin {
                name: entry.name.to_string(),
                source,
            })?;
        inv.stdout.flush()?;
        Ok(flow)
    }

    /// Reap finished background jobs and tell the user about them.
    pub fn report_finished_jobs(&mut self) {
        match self.jobs.reap() {
            Ok(finished) => {
                for job in finished {
                    eprintln!("{job}");
                }
            }
            Err(err) => error!("{err}"),
        }
    }
}

fn open_error(target: &std::path::Path, source: io::Error) -> ShellError {
    LaunchError::Resource(ResourceError::OpenTarget {
        path: target.to_path_buf(),
        source,
    })
    .into()
}
