//! subproc-ctl: run a program and report how it exited

mod cli;
mod logging;
mod runner;

use clap::Parser;
use cli::Cli;
use console::style;
use runner::{run_program, RunConfig};
use std::time::Duration;
use subproc::SubprocessError;

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let timeout = match cli.timeout.map(Duration::try_from_secs_f64).transpose() {
        Ok(timeout) => timeout,
        Err(e) => {
            eprintln!("{} invalid --timeout: {}", style("error:").red().bold(), e);
            std::process::exit(2);
        }
    };

    let mut command = cli.command.into_iter();
    let Some(program) = command.next() else {
        eprintln!("{} No program specified", style("error:").red().bold());
        std::process::exit(2);
    };

    let config = RunConfig {
        program,
        args: command.collect(),
        cwd: cli.cwd,
        env: cli.env,
        clear_env: cli.clear_env,
        capture: cli.capture,
        merge_stderr: cli.merge_stderr,
        check: cli.check,
        json: cli.json,
        timeout,
    };

    match run_program(config) {
        Ok(code) => std::process::exit(code),
        Err(SubprocessError::CalledProcess(e)) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(e.returncode());
        }
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}
