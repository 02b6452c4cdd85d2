//! subproc: child processes without leaked descriptors or zombies
//!
//! Spawns programs with per-stream routing (inherit, close, pipe, caller
//! descriptor, or merged with the other output stream), then manages them
//! through a handle that can be polled, waited on with or without a deadline,
//! signalled, and is always reaped before it goes away.
//!
//! # Modules
//!
//! - **execution**: pipes, redirection planning, spawning, process handles, run/capture
//! - **utils**: program lookup and shell-style command rendering
//! - **errors**: error taxonomy and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use subproc::{capture, RunOptions};
//!
//! let result = capture(
//!     &["git", "rev-parse", "HEAD"],
//!     RunOptions {
//!         check: true,
//!         ..Default::default()
//!     },
//! )?;
//! println!("HEAD is {}", result.stdout_lossy().trim());
//! # Ok::<(), subproc::SubprocessError>(())
//! ```

pub mod errors;
pub mod execution;
pub mod utils;

pub use errors::{CalledProcessError, Result, SubprocessError};
pub use execution::{
    capture, run, CompletedProcess, ExitStatus, PipePair, Process, ProcessBuilder, RunOptions,
    StreamPolicy,
};
