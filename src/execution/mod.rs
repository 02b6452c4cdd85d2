//! Execution layer: spawning, stream routing and lifecycle management
//!
//! # Features
//!
//! - **Stream routing**: inherit, close, pipe, redirect or merge each standard stream
//! - **Process handles**: poll, wait with or without a deadline, signal
//! - **Guaranteed reaping**: closing or dropping a handle never leaves a zombie
//! - **Run and capture**: drain both output pipes concurrently without deadlock
//!
//! # Examples
//!
//! ```no_run
//! use subproc::execution::{ProcessBuilder, StreamPolicy};
//!
//! let mut child = ProcessBuilder::new()
//!     .stdout(StreamPolicy::Pipe)
//!     .spawn(&["ls", "-l"])?;
//! let status = child.wait()?;
//! # Ok::<(), subproc::SubprocessError>(())
//! ```

pub mod builder;
pub mod pipe;
pub mod process;
pub mod redirect;
pub mod run;
pub mod spawn;

pub use builder::ProcessBuilder;
pub use pipe::PipePair;
pub use process::{ExitStatus, Process, DEFAULT_POLL_INTERVAL};
pub use redirect::StreamPolicy;
pub use run::{capture, run, CompletedProcess, RunOptions};
