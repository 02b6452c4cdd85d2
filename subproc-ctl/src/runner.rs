use console::style;
use log::{debug, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use subproc::{
    capture, run, CompletedProcess, ProcessBuilder, RunOptions, StreamPolicy, SubprocessError,
};

/// Exit code reported when the program had to be stopped after `--timeout`
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Configuration for a single program execution
#[derive(Debug, Default)]
pub struct RunConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub clear_env: bool,
    pub capture: bool,
    pub merge_stderr: bool,
    pub check: bool,
    pub json: bool,
    pub timeout: Option<Duration>,
}

impl RunConfig {
    fn command(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Environment handed to the child: `None` when it can simply inherit
    fn environment(&self) -> Option<Vec<(String, String)>> {
        if self.clear_env {
            return Some(self.env.clone());
        }
        if self.env.is_empty() {
            return None;
        }

        let mut combined: Vec<(String, String)> = std::env::vars().collect();
        for (key, value) in &self.env {
            if let Some((_, existing)) = combined.iter_mut().find(|(k, _)| k == key) {
                *existing = value.clone();
            } else {
                combined.push((key.clone(), value.clone()));
            }
        }
        Some(combined)
    }

    fn stderr_policy(&self) -> StreamPolicy {
        if self.merge_stderr {
            StreamPolicy::MergeIntoStdout
        } else {
            StreamPolicy::Inherit
        }
    }
}

/// Run the configured program and return the exit code to report
pub fn run_program(config: RunConfig) -> Result<i32, SubprocessError> {
    info!("Executing: {} {:?}", config.program, config.args);

    if let Some(timeout) = config.timeout {
        return run_with_timeout(&config, timeout);
    }

    let options = RunOptions {
        stderr: config.stderr_policy(),
        cwd: config.cwd.clone(),
        env: config.environment(),
        check: config.check,
        ..Default::default()
    };

    let command = config.command();
    if !(config.capture || config.json) {
        let result = run(&command, options)?;
        return Ok(result.returncode());
    }

    let result = capture(&command, options)?;
    if config.json {
        println!("{}", to_json(&result));
    } else {
        print_captured(&result)?;
    }
    Ok(result.returncode())
}

fn run_with_timeout(config: &RunConfig, timeout: Duration) -> Result<i32, SubprocessError> {
    let mut builder = ProcessBuilder::new().stderr(config.stderr_policy());
    if let Some(dir) = &config.cwd {
        builder = builder.cwd(dir);
    }
    if let Some(vars) = config.environment() {
        builder = builder.env(vars);
    }

    let mut process = builder.spawn(&config.command())?;
    match process.wait_timeout(timeout) {
        Ok(status) => {
            debug!("{} {}", process.command_line(), status);
            if config.check && !status.success() {
                return Err(subproc::CalledProcessError {
                    command: config.command().iter().map(|s| s.to_string()).collect(),
                    status,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }
                .into());
            }
            Ok(status.code())
        }
        Err(SubprocessError::TimeoutExpired { .. }) => {
            warn!(
                "`{}` still running after {:?}, terminating",
                process.command_line(),
                timeout
            );
            process.terminate();
            if process.wait_timeout(TERMINATE_GRACE).is_err() {
                warn!("`{}` ignored SIGTERM, killing", process.command_line());
                process.kill();
                process.wait()?;
            }
            eprintln!(
                "{} {}",
                style("timed out:").red().bold(),
                process.command_line()
            );
            Ok(TIMEOUT_EXIT_CODE)
        }
        Err(e) => Err(e),
    }
}

fn print_captured(result: &CompletedProcess) -> Result<(), SubprocessError> {
    std::io::stdout().write_all(&result.stdout)?;
    std::io::stderr().write_all(&result.stderr)?;

    let exit_code_styled = if result.success() {
        style(result.returncode()).green().bold()
    } else {
        style(result.returncode()).red().bold()
    };
    eprintln!(
        "{}={} | {}={} | {}={}",
        style("exit_code").dim(),
        exit_code_styled,
        style("stdout_bytes").dim(),
        style(result.stdout.len()).bold(),
        style("stderr_bytes").dim(),
        style(result.stderr.len()).bold(),
    );
    Ok(())
}

pub fn to_json(result: &CompletedProcess) -> serde_json::Value {
    serde_json::json!({
        "program": result.program,
        "args": result.args,
        "status": result.status,
        "returncode": result.returncode(),
        "stdout": result.stdout_lossy(),
        "stderr": result.stderr_lossy(),
    })
}
