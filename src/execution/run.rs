//! Run a command to completion and collect its output
//!
//! Piped stdout and stderr are drained on their own scoped threads while the
//! child runs. Draining only one of them would let the child fill the other
//! pipe's buffer and block forever. All drains (and the stdin feeder, if any)
//! are joined before the final wait, so no pipe end outlives its reader and no
//! thread outlives the call.

use std::borrow::Cow;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::thread::{self, ScopedJoinHandle};

use log::debug;

use crate::errors::{CalledProcessError, Result, SubprocessError};
use crate::execution::builder::ProcessBuilder;
use crate::execution::process::{ExitStatus, Process};
use crate::execution::redirect::StreamPolicy;
use crate::utils::join_command;

/// Options for [`run`] and [`capture`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub stdin: StreamPolicy,
    pub stdout: StreamPolicy,
    pub stderr: StreamPolicy,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
    /// Replacement environment; `None` inherits the parent's
    pub env: Option<Vec<(String, String)>>,
    /// Bytes written to the child's stdin, which is then closed
    pub input: Option<Vec<u8>>,
    /// Turn a non-zero exit into [`SubprocessError::CalledProcess`]
    pub check: bool,
}

/// Outcome of a finished [`run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub program: String,
    /// Arguments, program name excluded
    pub args: Vec<String>,
    pub status: ExitStatus,
    /// Captured stdout; empty unless stdout was piped
    pub stdout: Vec<u8>,
    /// Captured stderr; empty unless stderr was piped
    pub stderr: Vec<u8>,
}

impl CompletedProcess {
    pub fn returncode(&self) -> i32 {
        self.status.code()
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Full command line, program name included
    pub fn command(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Pass a successful result through, otherwise fail with its output attached
    pub fn check_returncode(self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let command = self.command();
        Err(CalledProcessError {
            command,
            status: self.status,
            stdout: self.stdout,
            stderr: self.stderr,
        }
        .into())
    }
}

/// Spawn `command`, feed and drain its pipes, and wait for it to exit
pub fn run<S: AsRef<str>>(command: &[S], options: RunOptions) -> Result<CompletedProcess> {
    let RunOptions {
        stdin,
        stdout,
        stderr,
        cwd,
        env,
        input,
        check,
    } = options;

    let stdin = match (&input, stdin) {
        (None, policy) => policy,
        (Some(_), StreamPolicy::Inherit | StreamPolicy::Pipe) => StreamPolicy::Pipe,
        (Some(_), policy) => {
            return Err(SubprocessError::InvalidArgument(format!(
                "input cannot be combined with stdin policy {:?}",
                policy
            )))
        }
    };

    let mut builder = ProcessBuilder::new()
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr);
    if let Some(dir) = cwd {
        builder = builder.cwd(dir);
    }
    if let Some(vars) = env {
        builder = builder.env(vars);
    }

    let mut process = builder.spawn(command)?;
    let (stdout, stderr) = communicate(&mut process, input);
    let status = process.wait()?;

    debug!(
        "`{}` {} ({} bytes stdout, {} bytes stderr)",
        process.command_line(),
        status,
        stdout.len(),
        stderr.len()
    );

    let completed = CompletedProcess {
        program: process.program().to_string(),
        args: process.args().to_vec(),
        status,
        stdout,
        stderr,
    };

    if check {
        completed.check_returncode()
    } else {
        Ok(completed)
    }
}

/// [`run`] with stdout and stderr piped unless the options route them elsewhere
pub fn capture<S: AsRef<str>>(command: &[S], mut options: RunOptions) -> Result<CompletedProcess> {
    if options.stdout == StreamPolicy::Inherit {
        options.stdout = StreamPolicy::Pipe;
    }
    if options.stderr == StreamPolicy::Inherit {
        options.stderr = StreamPolicy::Pipe;
    }
    debug!("Capturing `{}`", join_command(command));
    run(command, options)
}

fn communicate(process: &mut Process, input: Option<Vec<u8>>) -> (Vec<u8>, Vec<u8>) {
    let stdin = process.take_stdin();
    let stdout = process.take_stdout();
    let stderr = process.take_stderr();

    thread::scope(|scope| {
        // Without input a piped stdin is dropped here, giving the child EOF.
        let feeder = match (stdin, input) {
            (Some(pipe), Some(bytes)) => Some(scope.spawn(move || feed(pipe, &bytes))),
            _ => None,
        };
        let out = stdout.map(|pipe| scope.spawn(move || drain(pipe)));
        let err = stderr.map(|pipe| scope.spawn(move || drain(pipe)));

        if let Some(handle) = feeder {
            let _ = handle.join();
        }
        (join_drain(out), join_drain(err))
    })
}

fn feed(mut pipe: File, bytes: &[u8]) {
    match pipe.write_all(bytes) {
        Ok(()) => {}
        // The child may exit without reading all of its input.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
        Err(e) => debug!("Writing child stdin failed: {}", e),
    }
}

fn drain(mut pipe: File) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf) {
        debug!("Draining child pipe stopped early: {}", e);
    }
    buf
}

fn join_drain(handle: Option<ScopedJoinHandle<'_, Vec<u8>>>) -> Vec<u8> {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(status: ExitStatus) -> CompletedProcess {
        CompletedProcess {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exit".to_string()],
            status,
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        }
    }

    #[test]
    fn check_returncode_passes_success_through() {
        let result = completed(ExitStatus::Exited(0)).check_returncode().unwrap();
        assert_eq!(result.stdout_lossy(), "out");
    }

    #[test]
    fn check_returncode_attaches_output() {
        let err = completed(ExitStatus::Exited(2)).check_returncode().unwrap_err();
        match err {
            SubprocessError::CalledProcess(e) => {
                assert_eq!(e.returncode(), 2);
                assert_eq!(e.command, vec!["sh", "-c", "exit"]);
                assert_eq!(e.stdout, b"out");
                assert_eq!(e.stderr, b"err");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn run_captures_piped_streams() {
        let result = run(
            &["sh", "-c", "printf out; printf err >&2"],
            RunOptions {
                stdout: StreamPolicy::Pipe,
                stderr: StreamPolicy::Pipe,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, b"out");
        assert_eq!(result.stderr, b"err");
        assert_eq!(result.args, vec!["-c", "printf out; printf err >&2"]);
    }

    #[test]
    fn run_without_pipes_captures_nothing() {
        let result = run(&["sh", "-c", "exit 0"], RunOptions::default()).unwrap();
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn input_requires_pipe_or_inherit() {
        let err = run(
            &["cat"],
            RunOptions {
                stdin: StreamPolicy::Close,
                input: Some(b"x".to_vec()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SubprocessError::InvalidArgument(_)));
    }

    #[test]
    fn input_is_fed_to_stdin() {
        let result = capture(
            &["cat"],
            RunOptions {
                input: Some(b"fed through stdin".to_vec()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(result.stdout_lossy(), "fed through stdin");
    }

    #[test]
    fn capture_respects_explicit_routing() {
        let result = capture(
            &["sh", "-c", "printf a; printf b >&2"],
            RunOptions {
                stderr: StreamPolicy::MergeIntoStdout,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(result.stdout, b"ab");
        assert!(result.stderr.is_empty());
    }
}
