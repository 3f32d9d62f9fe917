//! Process-wide shell state: interactivity, process group and terminal ownership.

use crate::jobs::SignalPolicy;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use std::io;
use std::os::fd::RawFd;
use tracing::{debug, warn};

/// The terminal the shell reads from.
const SHELL_TERMINAL: RawFd = libc::STDIN_FILENO;

/// State shared by every component that launches or waits for children.
///
/// Built once at start-up and passed around explicitly.
#[derive(Clone)]
pub struct ShellContext {
    interactive: bool,
    shell_pgid: Pid,
    saved_modes: Option<libc::termios>,
}

impl ShellContext {
    /// Set up the shell for the input it is attached to.
    ///
    /// On a terminal the shell waits until it is in the foreground, moves into its own
    /// process group, takes the terminal, records the terminal modes and starts
    /// ignoring job-control signals. Otherwise nothing process-wide is changed.
    pub fn init() -> io::Result<Self> {
        if unsafe { libc::isatty(SHELL_TERMINAL) } != 1 {
            return Ok(Self::detached());
        }

        // Stop ourselves until someone puts us in the foreground.
        loop {
            let pgid = unistd::getpgrp();
            if tcgetpgrp()? == pgid {
                break;
            }
            debug!(pgid = %pgid, "shell is in the background; waiting for the terminal");
            signal::killpg(pgid, Signal::SIGTTIN).map_err(io::Error::from)?;
        }

        SignalPolicy::Ignored.apply().map_err(io::Error::from)?;

        let shell_pgid = unistd::getpid();
        if let Err(err) = unistd::setpgid(shell_pgid, shell_pgid) {
            // A session leader already owns its group.
            if unistd::getpgrp() != shell_pgid {
                return Err(err.into());
            }
        }
        tcsetpgrp(shell_pgid)?;
        let saved_modes = Some(tcgetattr()?);
        debug!(pgid = %shell_pgid, "interactive shell owns the terminal");

        Ok(Self {
            interactive: true,
            shell_pgid,
            saved_modes,
        })
    }

    /// Context for input that is not a terminal: no job control, signals untouched.
    pub fn detached() -> Self {
        Self {
            interactive: false,
            shell_pgid: unistd::getpgrp(),
            saved_modes: None,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// Give the terminal to `pgid` (a foreground job). No-op when not interactive.
    pub fn hand_terminal_to(&self, pgid: Pid) {
        if !self.interactive {
            return;
        }
        if let Err(err) = tcsetpgrp(pgid) {
            warn!(pgid = %pgid, "could not hand the terminal to the job: {err}");
        }
    }

    /// Take the terminal back after a foreground job and restore the saved modes.
    pub fn reclaim_terminal(&self) {
        if !self.interactive {
            return;
        }
        if let Err(err) = tcsetpgrp(self.shell_pgid) {
            warn!("could not reclaim the terminal: {err}");
        }
        if let Some(modes) = &self.saved_modes {
            if let Err(err) = tcsetattr(modes) {
                warn!("could not restore terminal modes: {err}");
            }
        }
    }
}

fn tcgetpgrp() -> io::Result<Pid> {
    let pgid = unsafe { libc::tcgetpgrp(SHELL_TERMINAL) };
    if pgid == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(Pid::from_raw(pgid))
}

fn tcsetpgrp(pgid: Pid) -> io::Result<()> {
    if unsafe { libc::tcsetpgrp(SHELL_TERMINAL, pgid.as_raw()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn tcgetattr() -> io::Result<libc::termios> {
    let mut modes: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(SHELL_TERMINAL, &mut modes) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(modes)
}

fn tcsetattr(modes: &libc::termios) -> io::Result<()> {
    if unsafe { libc::tcsetattr(SHELL_TERMINAL, libc::TCSADRAIN, modes) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_context_does_no_job_control() {
        let ctx = ShellContext::detached();
        assert!(!ctx.is_interactive());
        assert_eq!(ctx.shell_pgid(), unistd::getpgrp());

        // Must not touch the terminal of the test runner.
        ctx.hand_terminal_to(Pid::from_raw(1));
        ctx.reclaim_terminal();
    }
}
