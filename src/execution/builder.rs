//! Process builder: stream routing, working directory and environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::errors::{Result, SubprocessError};
use crate::execution::process::{Process, DEFAULT_POLL_INTERVAL};
use crate::execution::redirect::{RedirectPlan, StreamPolicy};
use crate::execution::spawn::{spawn_with_plan, SpawnRequest};
use crate::utils::{join_command, resolve_program_path};

/// Builder pattern for spawning a child process
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    stdin: StreamPolicy,
    stdout: StreamPolicy,
    stderr: StreamPolicy,
    cwd: Option<PathBuf>,
    env: Option<Vec<(String, String)>>,
    poll_interval: Duration,
}

impl Default for ProcessBuilder {
    fn default() -> Self {
        Self {
            stdin: StreamPolicy::Inherit,
            stdout: StreamPolicy::Inherit,
            stderr: StreamPolicy::Inherit,
            cwd: None,
            env: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, policy: StreamPolicy) -> Self {
        self.stdin = policy;
        self
    }

    pub fn stdout(mut self, policy: StreamPolicy) -> Self {
        self.stdout = policy;
        self
    }

    pub fn stderr(mut self, policy: StreamPolicy) -> Self {
        self.stderr = policy;
        self
    }

    /// Run the child in `dir` instead of the parent's working directory
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Replace the child's environment with exactly `vars`.
    ///
    /// Nothing from the parent's environment is merged in, including `PATH`,
    /// which is also what program lookup uses from then on.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Start the child with an empty environment
    pub fn env_clear(mut self) -> Self {
        self.env = Some(Vec::new());
        self
    }

    /// Sleep between status checks when waiting with a timeout
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stdin_policy(&self) -> StreamPolicy {
        self.stdin
    }

    pub fn stdout_policy(&self) -> StreamPolicy {
        self.stdout
    }

    pub fn stderr_policy(&self) -> StreamPolicy {
        self.stderr
    }

    /// Spawn `command` (program name first, then its arguments).
    ///
    /// Fails with `InvalidArgument` for an empty command or an invalid stream
    /// combination, `ProgramNotFound` when the program does not resolve to an
    /// executable, and `Spawn` when the OS refuses to start it.
    pub fn spawn<S: AsRef<str>>(&self, command: &[S]) -> Result<Process> {
        let (name, _) = command.split_first().ok_or_else(|| {
            SubprocessError::InvalidArgument("command should not be empty".to_string())
        })?;
        let name = name.as_ref();

        let program = resolve_program_path(name, self.env.as_deref())
            .ok_or_else(|| SubprocessError::ProgramNotFound(name.to_string()))?;

        let plan = RedirectPlan::build(self.stdin, self.stdout, self.stderr)?;
        let argv: Vec<String> = command.iter().map(|arg| arg.as_ref().to_string()).collect();

        let pid = spawn_with_plan(&SpawnRequest {
            program: &program,
            argv: &argv,
            env: self.env.as_deref(),
            cwd: self.cwd.as_deref(),
            actions: plan.actions(),
        })?;

        let pipes = plan.into_parent_pipes();
        debug!("Started `{}` with pid {}", join_command(&argv), pid);

        let mut argv = argv;
        let args = argv.split_off(1);
        Ok(Process::new(
            pid,
            name.to_string(),
            args,
            pipes,
            self.poll_interval,
        ))
    }
}
