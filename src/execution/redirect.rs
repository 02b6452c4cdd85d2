//! Stream routing policies and the child-side redirection plan

use std::fs::File;
use std::os::fd::RawFd;

use crate::errors::{Result, SubprocessError};
use crate::execution::pipe::PipePair;

pub const STDIN_FILENO: RawFd = 0;
pub const STDOUT_FILENO: RawFd = 1;
pub const STDERR_FILENO: RawFd = 2;

/// How one of the child's standard streams is connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamPolicy {
    /// Share the parent's descriptor
    #[default]
    Inherit,
    /// Close the descriptor in the child
    Close,
    /// Connect the stream to a new pipe whose other end the parent keeps
    Pipe,
    /// Redirect to a descriptor owned by the caller. It must stay open until
    /// spawn returns; the parent's copy is never closed.
    Specific(RawFd),
    /// Send stderr wherever stdout goes (`2>&1`). Only valid for stderr.
    MergeIntoStdout,
    /// Send stdout wherever stderr goes (`1>&2`). Only valid for stdout.
    MergeIntoStderr,
}

/// One step applied in the child between fork and exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Close(RawFd),
    Dup2 { from: RawFd, to: RawFd },
}

/// Parent-side pipe endpoints kept after a successful spawn
#[derive(Debug, Default)]
pub struct ParentPipes {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

/// Child-side redirection plan plus the pipes created for it.
///
/// Streams are resolved in the order stdin, stdout, stderr. A stdout merge into
/// stderr is scheduled after stderr so stdout picks up stderr's final target.
/// Originals above the standard descriptors are closed once, after every dup,
/// since one descriptor may feed more than one stream.
#[derive(Debug, Default)]
pub struct RedirectPlan {
    actions: Vec<FileAction>,
    originals: Vec<RawFd>,
    stdin: Option<PipePair>,
    stdout: Option<PipePair>,
    stderr: Option<PipePair>,
}

impl RedirectPlan {
    pub fn build(stdin: StreamPolicy, stdout: StreamPolicy, stderr: StreamPolicy) -> Result<Self> {
        validate(stdin, stdout, stderr)?;

        let mut plan = RedirectPlan::default();

        plan.stdin = plan.route(stdin, STDIN_FILENO)?;
        plan.stdout = plan.route(stdout, STDOUT_FILENO)?;
        plan.stderr = plan.route(stderr, STDERR_FILENO)?;

        if stderr == StreamPolicy::MergeIntoStdout {
            plan.actions.push(FileAction::Dup2 {
                from: STDOUT_FILENO,
                to: STDERR_FILENO,
            });
        }
        if stdout == StreamPolicy::MergeIntoStderr {
            plan.actions.push(FileAction::Dup2 {
                from: STDERR_FILENO,
                to: STDOUT_FILENO,
            });
        }

        let originals = std::mem::take(&mut plan.originals);
        plan.actions
            .extend(originals.into_iter().map(FileAction::Close));

        Ok(plan)
    }

    pub fn actions(&self) -> &[FileAction] {
        &self.actions
    }

    /// Drop the child-facing pipe ends and hand the parent-facing ends out.
    ///
    /// Called right after spawn: from here on the child holds the only copies of
    /// its ends, so the parent sees EOF as soon as the child closes them.
    pub fn into_parent_pipes(self) -> ParentPipes {
        let stdin = self.stdin.and_then(|mut pair| {
            pair.close_read_end();
            pair.disown().1
        });
        let stdout = self.stdout.and_then(|mut pair| {
            pair.close_write_end();
            pair.disown().0
        });
        let stderr = self.stderr.and_then(|mut pair| {
            pair.close_write_end();
            pair.disown().0
        });

        ParentPipes {
            stdin: stdin.map(File::from),
            stdout: stdout.map(File::from),
            stderr: stderr.map(File::from),
        }
    }

    fn route(&mut self, policy: StreamPolicy, target: RawFd) -> Result<Option<PipePair>> {
        match policy {
            StreamPolicy::Inherit | StreamPolicy::MergeIntoStdout | StreamPolicy::MergeIntoStderr => {
                Ok(None)
            }
            StreamPolicy::Close => {
                self.actions.push(FileAction::Close(target));
                Ok(None)
            }
            StreamPolicy::Specific(fd) => {
                if fd != target {
                    self.redirect(fd, target);
                }
                Ok(None)
            }
            StreamPolicy::Pipe => {
                let pair = PipePair::create()?;
                let child_end = if target == STDIN_FILENO {
                    pair.read_fd()
                } else {
                    pair.write_fd()
                };
                if let Some(fd) = child_end {
                    self.redirect(fd, target);
                }
                Ok(Some(pair))
            }
        }
    }

    /// A pipe end that landed on its own target still needs the dup, which
    /// clears its close-on-exec flag.
    fn redirect(&mut self, fd: RawFd, target: RawFd) {
        self.actions.push(FileAction::Dup2 { from: fd, to: target });
        // The standard descriptors may still be needed by a later stream.
        if fd > STDERR_FILENO && !self.originals.contains(&fd) {
            self.originals.push(fd);
        }
    }
}

fn validate(stdin: StreamPolicy, stdout: StreamPolicy, stderr: StreamPolicy) -> Result<()> {
    if matches!(
        stdin,
        StreamPolicy::MergeIntoStdout | StreamPolicy::MergeIntoStderr
    ) {
        return Err(SubprocessError::InvalidArgument(
            "stdin cannot be merged into an output stream".to_string(),
        ));
    }
    if stdout == StreamPolicy::MergeIntoStdout {
        return Err(SubprocessError::InvalidArgument(
            "stdout cannot be merged into itself".to_string(),
        ));
    }
    if stderr == StreamPolicy::MergeIntoStderr {
        return Err(SubprocessError::InvalidArgument(
            "stderr cannot be merged into itself".to_string(),
        ));
    }
    if stdout == StreamPolicy::MergeIntoStderr && stderr == StreamPolicy::MergeIntoStdout {
        return Err(SubprocessError::InvalidArgument(
            "stdout and stderr cannot be merged into each other".to_string(),
        ));
    }
    for (name, policy) in [("stdin", stdin), ("stdout", stdout), ("stderr", stderr)] {
        if let StreamPolicy::Specific(fd) = policy {
            if fd < 0 {
                return Err(SubprocessError::InvalidArgument(format!(
                    "{} descriptor {} is not valid",
                    name, fd
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn inherit_everything_schedules_nothing() {
        let plan = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::Inherit,
            StreamPolicy::Inherit,
        )
        .unwrap();
        assert!(plan.actions().is_empty());

        let pipes = plan.into_parent_pipes();
        assert!(pipes.stdin.is_none());
        assert!(pipes.stdout.is_none());
        assert!(pipes.stderr.is_none());
    }

    #[test]
    fn close_schedules_close_of_target() {
        let plan = RedirectPlan::build(
            StreamPolicy::Close,
            StreamPolicy::Inherit,
            StreamPolicy::Close,
        )
        .unwrap();
        assert_eq!(
            plan.actions(),
            &[
                FileAction::Close(STDIN_FILENO),
                FileAction::Close(STDERR_FILENO)
            ]
        );
    }

    #[test]
    fn specific_dups_then_closes_original() {
        let plan = RedirectPlan::build(
            StreamPolicy::Specific(17),
            StreamPolicy::Inherit,
            StreamPolicy::Inherit,
        )
        .unwrap();
        assert_eq!(
            plan.actions(),
            &[
                FileAction::Dup2 {
                    from: 17,
                    to: STDIN_FILENO
                },
                FileAction::Close(17)
            ]
        );
    }

    #[test]
    fn specific_standard_descriptor_is_not_closed() {
        let plan = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::Specific(STDERR_FILENO),
            StreamPolicy::Inherit,
        )
        .unwrap();
        assert_eq!(
            plan.actions(),
            &[FileAction::Dup2 {
                from: STDERR_FILENO,
                to: STDOUT_FILENO
            }]
        );
    }

    #[test]
    fn pipe_dups_child_end_onto_target() {
        let plan = RedirectPlan::build(
            StreamPolicy::Pipe,
            StreamPolicy::Pipe,
            StreamPolicy::Inherit,
        )
        .unwrap();

        let stdin_read = plan.stdin.as_ref().unwrap().read_fd().unwrap();
        let stdout_write = plan.stdout.as_ref().unwrap().write_fd().unwrap();
        assert_eq!(
            plan.actions(),
            &[
                FileAction::Dup2 {
                    from: stdin_read,
                    to: STDIN_FILENO
                },
                FileAction::Dup2 {
                    from: stdout_write,
                    to: STDOUT_FILENO
                },
                FileAction::Close(stdin_read),
                FileAction::Close(stdout_write),
            ]
        );
    }

    #[test]
    fn stderr_merge_follows_resolved_stdout() {
        let plan = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::Pipe,
            StreamPolicy::MergeIntoStdout,
        )
        .unwrap();
        let last = *plan.actions().last().unwrap();
        assert_eq!(
            last,
            FileAction::Dup2 {
                from: STDOUT_FILENO,
                to: STDERR_FILENO
            }
        );
        assert!(plan.stderr.is_none());
    }

    #[test]
    fn stdout_merge_is_scheduled_after_stderr() {
        let plan = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::MergeIntoStderr,
            StreamPolicy::Specific(9),
        )
        .unwrap();
        assert_eq!(
            plan.actions(),
            &[
                FileAction::Dup2 {
                    from: 9,
                    to: STDERR_FILENO
                },
                FileAction::Dup2 {
                    from: STDERR_FILENO,
                    to: STDOUT_FILENO
                },
                FileAction::Close(9),
            ]
        );
    }

    #[test]
    fn shared_descriptor_is_closed_once_after_both_dups() {
        let plan = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::Specific(17),
            StreamPolicy::Specific(17),
        )
        .unwrap();
        assert_eq!(
            plan.actions(),
            &[
                FileAction::Dup2 {
                    from: 17,
                    to: STDOUT_FILENO
                },
                FileAction::Dup2 {
                    from: 17,
                    to: STDERR_FILENO
                },
                FileAction::Close(17),
            ]
        );
    }

    #[test]
    fn specific_target_descriptor_schedules_nothing() {
        let plan = RedirectPlan::build(
            StreamPolicy::Specific(STDIN_FILENO),
            StreamPolicy::Specific(STDOUT_FILENO),
            StreamPolicy::Specific(STDERR_FILENO),
        )
        .unwrap();
        assert!(plan.actions().is_empty());
    }

    #[test]
    fn rejects_invalid_merges() {
        let both = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::MergeIntoStderr,
            StreamPolicy::MergeIntoStdout,
        );
        assert!(matches!(both, Err(SubprocessError::InvalidArgument(_))));

        let stdin = RedirectPlan::build(
            StreamPolicy::MergeIntoStdout,
            StreamPolicy::Inherit,
            StreamPolicy::Inherit,
        );
        assert!(matches!(stdin, Err(SubprocessError::InvalidArgument(_))));

        let self_merge = RedirectPlan::build(
            StreamPolicy::Inherit,
            StreamPolicy::MergeIntoStdout,
            StreamPolicy::Inherit,
        );
        assert!(matches!(self_merge, Err(SubprocessError::InvalidArgument(_))));

        let negative = RedirectPlan::build(
            StreamPolicy::Specific(-1),
            StreamPolicy::Inherit,
            StreamPolicy::Inherit,
        );
        assert!(matches!(negative, Err(SubprocessError::InvalidArgument(_))));
    }

    #[test]
    fn parent_pipes_keep_the_parent_ends() {
        let plan = RedirectPlan::build(
            StreamPolicy::Pipe,
            StreamPolicy::Pipe,
            StreamPolicy::Inherit,
        )
        .unwrap();
        let pipes = plan.into_parent_pipes();

        // Both child ends are gone: stdin has no reader left and stdout has
        // no writer left.
        let mut stdin = pipes.stdin.unwrap();
        let err = stdin.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);

        let mut out = Vec::new();
        pipes.stdout.unwrap().read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
