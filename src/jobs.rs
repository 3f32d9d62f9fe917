//! Job tracking and the shell's signal policy.

use crate::command::ExitCode;
use crate::error::ResourceError;
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fmt;
use tracing::{debug, warn};

/// Signals generated by the terminal for the foreground process group.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

/// Disposition of the job-control signals.
///
/// An interactive shell runs `Ignored` so that keyboard signals aimed at the
/// foreground job do not also hit the shell. Every child goes back to `Default`
/// after fork and before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicy {
    Default,
    Ignored,
}

impl SignalPolicy {
    fn handler(self) -> SigHandler {
        match self {
            SignalPolicy::Default => SigHandler::SigDfl,
            SignalPolicy::Ignored => SigHandler::SigIgn,
        }
    }

    /// Install this policy in the calling process.
    pub fn apply(self) -> nix::Result<()> {
        for sig in JOB_CONTROL_SIGNALS {
            // SAFETY: only SIG_DFL and SIG_IGN are installed, no handler code runs.
            unsafe { signal::signal(sig, self.handler()) }?;
        }
        debug!(policy = ?self, "applied signal policy");
        Ok(())
    }

    /// Reset the job-control signals to their default action in a forked child.
    ///
    /// Only calls `signal(2)`, which is async-signal-safe.
    pub(crate) fn reset_in_child() {
        for sig in JOB_CONTROL_SIGNALS {
            unsafe {
                libc::signal(sig as libc::c_int, libc::SIG_DFL);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Done(ExitCode),
}

/// A child process started by the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Shell-local number; assigned when the job is tracked, 0 for foreground jobs.
    pub id: usize,
    pub pid: Pid,
    pub pgid: Pid,
    pub command: String,
    pub state: JobState,
    pub background: bool,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            JobState::Running => write!(f, "[{}]  Running\t{}", self.id, self.command),
            JobState::Done(0) => write!(f, "[{}]  Done\t{}", self.id, self.command),
            JobState::Done(code) => write!(f, "[{}]  Exit {}\t{}", self.id, code, self.command),
        }
    }
}

/// Convert a wait status into a shell exit code, or `None` if the child has not
/// terminated.
pub fn exit_code_of(status: WaitStatus) -> Option<ExitCode> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
        _ => None,
    }
}

/// Background jobs that have not been reported as finished yet.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    /// Start tracking a background job, giving it the lowest free job number.
    pub fn track(&mut self, mut job: Job) -> &Job {
        job.id = (1..)
            .find(|id| self.jobs.iter().all(|j| j.id != *id))
            .unwrap_or(1);
        debug!(id = job.id, pid = %job.pid, "tracking background job");
        self.jobs.push(job);
        let last = self.jobs.len() - 1;
        &self.jobs[last]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Collect every tracked job that has terminated, without blocking.
    ///
    /// Each pid is polled individually so children the table does not own are left
    /// alone. Finished jobs are removed from the table and returned in job order.
    /// A job whose status was collected elsewhere is dropped without a notice.
    pub fn reap(&mut self) -> Result<Vec<Job>, ResourceError> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.jobs.len());
        let mut failure = None;

        for mut job in self.jobs.drain(..) {
            match waitpid(job.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => match exit_code_of(status) {
                    Some(code) => {
                        debug!(id = job.id, pid = %job.pid, code, "reaped background job");
                        job.state = JobState::Done(code);
                        finished.push(job);
                    }
                    None => still_running.push(job),
                },
                Err(Errno::ECHILD) => {
                    // Someone else collected it; there is no status left to report.
                    warn!(id = job.id, pid = %job.pid, "background job vanished before it was reaped");
                }
                Err(err) => {
                    still_running.push(job);
                    failure = Some(err);
                }
            }
        }
        self.jobs = still_running;

        match failure {
            Some(err) if finished.is_empty() => Err(ResourceError::Wait(err)),
            _ => Ok(finished),
        }
    }
}
