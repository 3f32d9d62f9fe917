use anyhow::{Context, Result};
use argh::FromArgs;
use jobshell::env::Environment;
use jobshell::{Interactive, LineSource, Piped, Shell, ShellContext};
use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "JOBSHELL_LOG";

#[derive(FromArgs)]
/// A small job-control shell. Reads commands from the terminal, a pipe or a script.
struct Options {
    #[argh(switch, short = 'v')]
    /// log what the shell does (same as --log debug).
    verbose: bool,

    #[argh(option)]
    /// log filter, e.g. `debug` or `jobshell=trace`; overrides JOBSHELL_LOG.
    log: Option<String>,

    #[argh(positional)]
    /// file to read commands from instead of standard input.
    script: Option<PathBuf>,
}

fn init_logging(options: &Options) {
    let filter = options
        .log
        .clone()
        .or_else(|| std::env::var(LOG_ENV).ok())
        .unwrap_or_else(|| if options.verbose { "debug" } else { "warn" }.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn run(options: &Options) -> Result<i32> {
    let env = Environment::new();

    let (ctx, mut source): (ShellContext, Box<dyn LineSource>) = match &options.script {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open script {}", path.display()))?;
            (ShellContext::detached(), Box::new(Piped::new(BufReader::new(file))))
        }
        None => {
            let ctx = ShellContext::init().context("cannot initialize the terminal")?;
            let source: Box<dyn LineSource> = if ctx.is_interactive() {
                Box::new(Interactive::new().context("cannot start the line editor")?)
            } else {
                Box::new(Piped::new(io::stdin().lock()))
            };
            (ctx, source)
        }
    };
    info!(
        interactive = ctx.is_interactive(),
        pgid = %ctx.shell_pgid(),
        "jobshell {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let mut shell = Shell::new(ctx, env);
    let code = shell.run(source.as_mut());
    debug!(code, "shell finished");
    Ok(code)
}

fn main() {
    let options: Options = argh::from_env();
    init_logging(&options);

    match run(&options) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("jobshell: {err:#}");
            std::process::exit(1);
        }
    }
}
