//! Error types for subprocess operations

use std::fmt;
use std::io;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

use crate::execution::ExitStatus;
use crate::utils::join_command;

/// Result type for subprocess operations
pub type Result<T> = std::result::Result<T, SubprocessError>;

/// Errors that can occur while spawning, waiting on or running a child process
#[derive(Error, Debug)]
pub enum SubprocessError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command not found: {0}")]
    ProgramNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Errno,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    TimeoutExpired { command: String, timeout: Duration },

    #[error(transparent)]
    CalledProcess(Box<CalledProcessError>),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("waitpid({pid}) failed: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: Errno,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CalledProcessError> for SubprocessError {
    fn from(err: CalledProcessError) -> Self {
        SubprocessError::CalledProcess(Box::new(err))
    }
}

/// A process that exited unsuccessfully while its caller asked for a check.
///
/// Carries everything needed to diagnose the failure without re-running it:
/// the full command line, the exit status and both captured streams.
#[derive(Debug, Clone)]
pub struct CalledProcessError {
    pub command: Vec<String>,
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CalledProcessError {
    /// Exit code as reported by [`ExitStatus::code`]
    pub fn returncode(&self) -> i32 {
        self.status.code()
    }
}

impl fmt::Display for CalledProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command `{}` {}",
            join_command(&self.command),
            self.status
        )
    }
}

impl std::error::Error for CalledProcessError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SubprocessError::InvalidArgument("command should not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid argument: command should not be empty"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err = SubprocessError::from(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_spawn_error_carries_os_text() {
        let err = SubprocessError::Spawn {
            program: "/bin/true".to_string(),
            source: Errno::EACCES,
        };
        let text = err.to_string();
        assert!(text.contains("/bin/true"));
        assert!(text.contains(&Errno::EACCES.desc().to_string()));
    }

    #[test]
    fn test_timeout_mentions_command() {
        let err = SubprocessError::TimeoutExpired {
            command: "sleep 5".to_string(),
            timeout: Duration::from_millis(100),
        };
        assert!(err.to_string().contains("sleep 5"));
    }

    #[test]
    fn test_called_process_error_display() {
        let err = CalledProcessError {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()],
            status: ExitStatus::Exited(7),
            stdout: Vec::new(),
            stderr: b"boom".to_vec(),
        };
        assert_eq!(err.returncode(), 7);
        assert_eq!(
            err.to_string(),
            "Command `sh -c 'exit 7'` exited with code 7"
        );

        let wrapped = SubprocessError::from(err);
        assert!(matches!(wrapped, SubprocessError::CalledProcess(ref e) if e.returncode() == 7));
    }
}
