use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "subproc-ctl")]
#[command(version, about = "Run a program and report how it exited", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Pass output through and mirror the exit code
    subproc-ctl make test

    # Capture both streams and print them as JSON
    subproc-ctl --json -- sh -c 'echo out; echo err >&2'

    # Run in another directory with a clean environment
    subproc-ctl -C /tmp --clear-env -e PATH=/usr/bin:/bin ls

    # Give a program five seconds, then terminate it
    subproc-ctl --timeout 5 sleep 60
")]
pub struct Cli {
    /// Program to run, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,

    /// Working directory for the program
    #[arg(short = 'C', long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Set an environment variable (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Start from an empty environment instead of the current one
    #[arg(long)]
    pub clear_env: bool,

    /// Capture stdout and stderr instead of passing them through
    #[arg(short, long)]
    pub capture: bool,

    /// Send stderr to wherever stdout goes
    #[arg(long)]
    pub merge_stderr: bool,

    /// Treat a non-zero exit as an error
    #[arg(long)]
    pub check: bool,

    /// Print the captured result as JSON (implies --capture)
    #[arg(long)]
    pub json: bool,

    /// Seconds to wait before terminating the program
    #[arg(short, long, value_name = "SECONDS", conflicts_with_all = ["capture", "json"])]
    pub timeout: Option<f64>,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parse a `KEY=VALUE` pair; the value may itself contain `=`
pub fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}
