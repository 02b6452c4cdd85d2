//! Live child process handle
//!
//! A [`Process`] moves through three states: spawned, reaped (exit status
//! cached) and closed (pipes released). Dropping a handle closes it, and closing
//! reaps the child first if needed, so a handle never leaves a zombie behind.

use std::fmt;
use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SubprocessError};
use crate::execution::redirect::ParentPipes;
use crate::utils::join_command;

/// Default sleep between status checks in [`Process::wait_timeout`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How a reaped child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Normal exit with the given code
    Exited(i32),
    /// Killed by the given signal number
    Signaled(i32),
}

impl ExitStatus {
    /// Exit code; a signal death reports `128 + signal` like a shell does
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(signal) => 128 + signal,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match *self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(signal) => Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitStatus::Exited(0)
    }

    /// Terminal statuses only; stop/continue notifications yield `None`
    fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ExitStatus::Signaled(signal as i32)),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ExitStatus::Exited(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signaled(signal) => match Signal::try_from(signal) {
                Ok(sig) => write!(f, "was killed by signal {} ({})", signal, sig.as_str()),
                Err(_) => write!(f, "was killed by signal {}", signal),
            },
        }
    }
}

/// Handle to a spawned child and the parent ends of its pipes
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    program: String,
    args: Vec<String>,
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
    status: Option<ExitStatus>,
    poll_interval: Duration,
    closed: bool,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        program: String,
        args: Vec<String>,
        pipes: ParentPipes,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pid,
            program,
            args,
            stdin: pipes.stdin,
            stdout: pipes.stdout,
            stderr: pipes.stderr,
            status: None,
            poll_interval,
            closed: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Program name as given on the command line
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, program name excluded
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Write end of the child's stdin pipe
    pub fn stdin(&mut self) -> Option<&mut File> {
        self.stdin.as_mut()
    }

    /// Read end of the child's stdout pipe
    pub fn stdout(&mut self) -> Option<&mut File> {
        self.stdout.as_mut()
    }

    /// Read end of the child's stderr pipe
    pub fn stderr(&mut self) -> Option<&mut File> {
        self.stderr.as_mut()
    }

    pub fn take_stdin(&mut self) -> Option<File> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<File> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<File> {
        self.stderr.take()
    }

    /// Cached exit status, if the child has been reaped
    pub fn returncode(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check without blocking whether the child has terminated
    pub fn poll(&mut self) -> Result<bool> {
        if self.status.is_some() {
            return Ok(true);
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => Ok(false),
            Ok(status) => Ok(self.record(status).is_some()),
            Err(source) => Err(SubprocessError::Wait {
                pid: self.pid.as_raw(),
                source,
            }),
        }
    }

    /// Block until the child terminates. Signal interruptions are retried.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(exit) = self.record(status) {
                        return Ok(exit);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(source) => {
                    return Err(SubprocessError::Wait {
                        pid: self.pid.as_raw(),
                        source,
                    })
                }
            }
        }
    }

    /// Wait at most `timeout` for the child to terminate.
    ///
    /// Polls every `poll_interval`. On expiry the child is left running and
    /// unreaped, so the caller may wait again or signal it. A timeout too large
    /// to express as a deadline waits indefinitely.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };

        loop {
            if self.poll()? {
                if let Some(status) = self.status {
                    return Ok(status);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SubprocessError::TimeoutExpired {
                    command: self.command_line(),
                    timeout,
                });
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Deliver `signal` to the child.
    ///
    /// Returns whether delivery succeeded. A reaped child is never signalled,
    /// since its pid may already belong to another process.
    pub fn send_signal(&self, signal: Signal) -> bool {
        if self.status.is_some() {
            return false;
        }

        match kill(self.pid, signal) {
            Ok(()) => {
                debug!("Sent {} to pid {}", signal, self.pid);
                true
            }
            Err(e) => {
                debug!("Failed to send {} to pid {}: {}", signal, self.pid, e);
                false
            }
        }
    }

    /// Ask the child to shut down (SIGTERM)
    pub fn terminate(&self) -> bool {
        self.send_signal(Signal::SIGTERM)
    }

    /// Kill the child immediately (SIGKILL)
    pub fn kill(&self) -> bool {
        self.send_signal(Signal::SIGKILL)
    }

    /// Release every pipe end and reap the child. Idempotent.
    ///
    /// Pipes go first so a child blocked on stdin sees EOF. If the child is
    /// still running this blocks until it exits.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.stdin.take();
        self.stdout.take();
        self.stderr.take();

        let result = self.wait().map(|_| ());
        self.closed = true;
        debug!("Closed handle for pid {}", self.pid);
        result
    }

    /// Program and arguments as one shell-quoted string
    pub fn command_line(&self) -> String {
        let mut command = Vec::with_capacity(self.args.len() + 1);
        command.push(self.program.as_str());
        command.extend(self.args.iter().map(String::as_str));
        join_command(&command)
    }

    fn record(&mut self, status: WaitStatus) -> Option<ExitStatus> {
        let exit = ExitStatus::from_wait_status(status)?;
        debug!("Reaped pid {}: {}", self.pid, exit);
        self.status = Some(exit);
        Some(exit)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to reap pid {}: {}", self.pid, e);
        }
    }
}
