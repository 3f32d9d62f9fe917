//! Starting external programs.
//!
//! The launcher forks once per command. Everything the child needs is prepared by
//! the parent beforehand, so the child only makes async-signal-safe calls between
//! `fork` and `execve`: join a process group, reset signals, apply the redirection,
//! then try every candidate path in order.
//!
//! The child reports a failure before exec through a close-on-exec pipe. The parent
//! reads it to completion: end of file without data means the program image was
//! replaced, a report means the launch failed and the child already exited.

use crate::command::{Command, ExitCode, NOT_FOUND_EXIT_CODE};
use crate::context::ShellContext;
use crate::env::Environment;
use crate::error::{LaunchError, ResourceError};
use crate::jobs::{Job, JobState, SignalPolicy, exit_code_of};
use crate::path;
use crate::redirect::Direction;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tracing::debug;

/// Creates a child process for a command and applies its redirection.
pub trait ProcessLauncher {
    /// Start `cmd`.
    ///
    /// A foreground command has finished when this returns (its job is `Done`). A
    /// background command returns at once with a `Running` job that the caller must
    /// track and reap.
    fn spawn(
        &mut self,
        ctx: &ShellContext,
        env: &Environment,
        cmd: &Command,
    ) -> Result<Job, LaunchError>;
}

/// [`ProcessLauncher`] built on `fork(2)` and `execve(2)`.
#[derive(Debug, Default)]
pub struct ForkLauncher;

/// Step at which a child gave up before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum FailedStage {
    OpenTarget = 1,
    Redirect = 2,
    Exec = 3,
}

impl FailedStage {
    fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(FailedStage::OpenTarget),
            2 => Some(FailedStage::Redirect),
            3 => Some(FailedStage::Exec),
            _ => None,
        }
    }
}

/// Stage and errno, as written by the child.
const REPORT_LEN: usize = 8;

/// Owned C strings for one launch, built before fork.
struct Prepared {
    argv: Vec<CString>,
    envp: Vec<CString>,
    candidates: Vec<CString>,
    redirection: Option<(Direction, CString, PathBuf)>,
}

impl Prepared {
    fn new(env: &Environment, cmd: &Command) -> Result<Self, LaunchError> {
        let argv = cmd
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_str()).map_err(|_| LaunchError::InvalidArgument(arg.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let candidates = path::resolve(cmd.name(), env.search_path())
            .filter_map(|candidate| CString::new(candidate.as_os_str().as_bytes()).ok())
            .collect();

        let redirection = match &cmd.redirection {
            Some(plan) => {
                let target = CString::new(plan.target.as_os_str().as_bytes()).map_err(|_| {
                    LaunchError::InvalidArgument(plan.target.to_string_lossy().into_owned())
                })?;
                Some((plan.direction, target, plan.target.clone()))
            }
            None => None,
        };

        Ok(Self {
            argv,
            envp: env.to_envp(),
            candidates,
            redirection,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Everything the child touches, borrowed from `Prepared`.
struct ChildSetup<'a> {
    job_control: bool,
    foreground: bool,
    redirection: Option<(Direction, &'a CStr)>,
    candidates: &'a [CString],
    argv: &'a [*const libc::c_char],
    envp: &'a [*const libc::c_char],
    report: RawFd,
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// Write the failure report and leave without running destructors or atexit hooks.
fn report_and_exit(report: RawFd, stage: FailedStage, errno: i32, code: ExitCode) -> ! {
    let mut buf = [0u8; REPORT_LEN];
    buf[..4].copy_from_slice(&(stage as i32).to_be_bytes());
    buf[4..].copy_from_slice(&errno.to_be_bytes());
    unsafe {
        libc::write(report, buf.as_ptr().cast(), REPORT_LEN);
        libc::_exit(code)
    }
}

/// Runs in the forked child. Never returns.
fn exec_child(setup: &ChildSetup<'_>) -> ! {
    unsafe {
        if setup.job_control {
            libc::setpgid(0, 0);
            if setup.foreground {
                // SIGTTOU is still ignored here, so this cannot stop us.
                libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
            }
        }
        SignalPolicy::reset_in_child();

        if let Some((direction, target)) = setup.redirection {
            let (flags, slots): (libc::c_int, &[libc::c_int]) = match direction {
                Direction::Output => (
                    libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                    &[libc::STDOUT_FILENO, libc::STDERR_FILENO],
                ),
                Direction::Input => (libc::O_RDONLY | libc::O_CLOEXEC, &[libc::STDIN_FILENO]),
            };
            let fd = libc::open(target.as_ptr(), flags, 0o644 as libc::c_uint);
            if fd < 0 {
                report_and_exit(setup.report, FailedStage::OpenTarget, last_errno(), 1);
            }
            for &slot in slots {
                if libc::dup2(fd, slot) < 0 {
                    let errno = last_errno();
                    libc::close(fd);
                    report_and_exit(setup.report, FailedStage::Redirect, errno, 1);
                }
            }
            libc::close(fd);
        }

        // ENOENT unless some candidate existed but could not be run.
        let mut errno = libc::ENOENT;
        for candidate in setup.candidates {
            libc::execve(candidate.as_ptr(), setup.argv.as_ptr(), setup.envp.as_ptr());
            let err = last_errno();
            if errno == libc::ENOENT && err != libc::ENOENT && err != libc::ENOTDIR {
                errno = err;
            }
        }
        report_and_exit(setup.report, FailedStage::Exec, errno, NOT_FOUND_EXIT_CODE)
    }
}

/// Read the child's report. `None` means exec succeeded.
fn read_report(read_end: OwnedFd) -> Result<Option<(FailedStage, i32)>, LaunchError> {
    let mut buf = Vec::with_capacity(REPORT_LEN);
    File::from(read_end)
        .read_to_end(&mut buf)
        .map_err(ResourceError::Pipe)?;
    if buf.len() < REPORT_LEN {
        return Ok(None);
    }
    let stage = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let errno = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok(FailedStage::from_raw(stage).map(|stage| (stage, errno)))
}

fn launch_error(cmd: &Command, target: Option<PathBuf>, stage: FailedStage, errno: i32) -> LaunchError {
    let source = io::Error::from_raw_os_error(errno);
    match stage {
        FailedStage::OpenTarget | FailedStage::Redirect => LaunchError::Resource(ResourceError::OpenTarget {
            path: target.unwrap_or_default(),
            source,
        }),
        FailedStage::Exec if errno == libc::ENOENT || errno == libc::ENOTDIR => {
            LaunchError::CommandNotFound(cmd.name().to_string())
        }
        FailedStage::Exec => LaunchError::Exec {
            name: cmd.name().to_string(),
            source,
        },
    }
}

/// How a foreground wait ended.
enum Waited {
    Exited(ExitCode),
    Stopped(Signal),
}

fn wait_foreground(pid: Pid) -> Result<Waited, ResourceError> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Stopped(_, sig)) => return Ok(Waited::Stopped(sig)),
            Ok(status) => {
                if let Some(code) = exit_code_of(status) {
                    return Ok(Waited::Exited(code));
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(ResourceError::Wait(err)),
        }
    }
}

/// Collect a child that reported a failure; it has already called `_exit`.
fn reap_failed(pid: Pid) {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            _ => break,
        }
    }
}

impl ProcessLauncher for ForkLauncher {
    fn spawn(
        &mut self,
        ctx: &ShellContext,
        env: &Environment,
        cmd: &Command,
    ) -> Result<Job, LaunchError> {
        let prepared = Prepared::new(env, cmd)?;
        let argv = null_terminated(&prepared.argv);
        let envp = null_terminated(&prepared.envp);
        let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC)
            .map_err(|err| ResourceError::Pipe(err.into()))?;

        let job_control = ctx.is_interactive();
        let foreground = !cmd.background;
        let setup = ChildSetup {
            job_control,
            foreground,
            redirection: prepared
                .redirection
                .as_ref()
                .map(|(direction, target, _)| (*direction, target.as_c_str())),
            candidates: &prepared.candidates,
            argv: &argv,
            envp: &envp,
            report: write_end.as_raw_fd(),
        };

        // Pending output must not be interleaved with the child's.
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        // SAFETY: the child branch only calls async-signal-safe functions and exits
        // through `execve` or `_exit`.
        let child = match unsafe { unistd::fork() }.map_err(ResourceError::Fork)? {
            ForkResult::Child => exec_child(&setup),
            ForkResult::Parent { child } => child,
        };
        drop(write_end);

        let pgid = if job_control {
            // Also done by the child; whichever runs first wins the race.
            let _ = unistd::setpgid(child, child);
            child
        } else {
            ctx.shell_pgid()
        };
        debug!(pid = %child, argv = ?cmd.argv, background = cmd.background, "forked");

        if let Some((stage, errno)) = read_report(read_end)? {
            reap_failed(child);
            if foreground {
                ctx.reclaim_terminal();
            }
            let target = prepared.redirection.map(|(_, _, path)| path);
            return Err(launch_error(cmd, target, stage, errno));
        }

        let mut job = Job {
            id: 0,
            pid: child,
            pgid,
            command: cmd.line.clone(),
            state: JobState::Running,
            background: cmd.background,
        };
        if cmd.background {
            return Ok(job);
        }

        ctx.hand_terminal_to(pgid);
        let waited = wait_foreground(child);
        ctx.reclaim_terminal();

        match waited? {
            Waited::Exited(code) => {
                debug!(pid = %child, code, "foreground job finished");
                job.state = JobState::Done(code);
            }
            Waited::Stopped(sig) => {
                // There is no `fg`, so a stopped job keeps running in the background.
                debug!(pid = %child, signal = ?sig, "foreground job stopped; continuing it in the background");
                let resumed = if job_control {
                    signal::killpg(pgid, Signal::SIGCONT)
                } else {
                    signal::kill(child, Signal::SIGCONT)
                };
                resumed.map_err(ResourceError::Wait)?;
                job.background = true;
            }
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::RedirectionPlan;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    fn test_env() -> Environment {
        let mut env = Environment::default();
        env.set_var("PATH", "/usr/local/bin:/usr/bin:/bin");
        env
    }

    fn command(argv: &[&str], redirection: Option<(Direction, PathBuf)>, background: bool) -> Command {
        Command {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            redirection: redirection.map(|(direction, target)| RedirectionPlan { direction, target }),
            background,
            line: argv.join(" "),
        }
    }

    fn run(cmd: &Command) -> Result<Job, LaunchError> {
        ForkLauncher.spawn(&ShellContext::detached(), &test_env(), cmd)
    }

    #[test]
    fn test_foreground_job_reports_exit_code() {
        let job = run(&command(&["sh", "-c", "exit 7"], None, false)).unwrap();
        assert_eq!(job.state, JobState::Done(7));
        assert!(!job.background);
    }

    #[test]
    fn test_output_redirection_truncates_once() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        fs::write(&out, "stale content that is much longer than the new one\n").unwrap();

        for _ in 0..2 {
            let job = run(&command(&["echo", "hi"], Some((Direction::Output, out.clone())), false)).unwrap();
            assert_eq!(job.state, JobState::Done(0));
        }
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");
    }

    #[test]
    fn test_output_redirection_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("err.txt");
        let job = run(&command(
            &["sh", "-c", "echo out; echo err 1>&2"],
            Some((Direction::Output, out.clone())),
            false,
        ))
        .unwrap();
        assert_eq!(job.state, JobState::Done(0));
        assert_eq!(fs::read_to_string(&out).unwrap(), "out\nerr\n");
    }

    #[test]
    fn test_large_output_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("seq.txt");
        run(&command(&["seq", "1", "5000"], Some((Direction::Output, out.clone())), false)).unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert_eq!(text.lines().count(), 5000);
        assert!(text.starts_with("1\n2\n"));
        assert!(text.ends_with("4999\n5000\n"));
    }

    #[test]
    fn test_input_redirection_feeds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "hello\n").unwrap();
        let job = run(&command(
            &["sh", "-c", "read line; test \"$line\" = hello"],
            Some((Direction::Input, input)),
            false,
        ))
        .unwrap();
        assert_eq!(job.state, JobState::Done(0));
    }

    #[test]
    fn test_missing_input_file_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&command(&["cat"], Some((Direction::Input, dir.path().join("absent"))), false))
            .unwrap_err();
        match err {
            LaunchError::Resource(ResourceError::OpenTarget { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_is_not_found() {
        let err = run(&command(&["definitely-not-a-real-command-xyz"], None, false)).unwrap_err();
        assert!(matches!(err, LaunchError::CommandNotFound(name) if name == "definitely-not-a-real-command-xyz"));
    }

    #[test]
    fn test_redirection_is_applied_before_exec() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let err = run(&command(&["no-such-program-abc"], Some((Direction::Output, out.clone())), false))
            .unwrap_err();
        assert!(matches!(err, LaunchError::CommandNotFound(_)));
        // The redirection is applied before exec is attempted.
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_path_entries_are_tried_after_the_literal_name() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hello-tool");
        fs::write(&script, "#!/bin/sh\nexit 5\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut env = test_env();
        env.set_var("PATH", format!("/nonexistent-dir:{}", dir.path().display()));
        let job = ForkLauncher
            .spawn(&ShellContext::detached(), &env, &command(&["hello-tool"], None, false))
            .unwrap();
        assert_eq!(job.state, JobState::Done(5));
    }

    #[test]
    fn test_non_executable_file_reports_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("not-executable");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let err = run(&command(&[script.to_str().unwrap()], None, false)).unwrap_err();
        match err {
            LaunchError::Exec { source, .. } => assert_eq!(source.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_environment_is_passed_to_the_child() {
        let mut env = test_env();
        env.set_var("GREETING", "hi");
        let job = ForkLauncher
            .spawn(
                &ShellContext::detached(),
                &env,
                &command(&["sh", "-c", "test \"$GREETING\" = hi"], None, false),
            )
            .unwrap();
        assert_eq!(job.state, JobState::Done(0));
    }

    #[test]
    fn test_background_job_returns_immediately() {
        let started = Instant::now();
        let job = run(&command(&["sleep", "5"], None, true)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(job.state, JobState::Running);
        assert!(job.background);

        signal::kill(job.pid, Signal::SIGKILL).unwrap();
        let status = waitpid(job.pid, None).unwrap();
        assert_eq!(exit_code_of(status), Some(128 + Signal::SIGKILL as i32));
    }

    #[test]
    fn test_child_restores_signals_the_shell_ignores() {
        let _ignored = crate::jobs::tests::ignore_job_control_signals();
        let job = run(&command(&["sh", "-c", "kill -INT $$; exit 0"], None, false)).unwrap();
        assert_eq!(job.state, JobState::Done(128 + Signal::SIGINT as i32));
    }

    #[test]
    fn test_nul_bytes_are_rejected_before_fork() {
        let err = run(&command(&["echo", "a\0b"], None, false)).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgument(_)));
    }
}
