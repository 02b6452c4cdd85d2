//! Owned OS pipe with selectively closable ends

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::debug;

use crate::errors::{Result, SubprocessError};

/// A unidirectional OS pipe.
///
/// Both descriptors are created close-on-exec, so only the copies explicitly
/// dup'ed onto a child's standard streams survive into that child. Each end is
/// closed exactly once: either through `close_*_end`, on drop, or by whoever
/// receives it from [`PipePair::disown`].
#[derive(Debug)]
pub struct PipePair {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl PipePair {
    /// Allocate a connected pair of descriptors
    pub fn create() -> Result<Self> {
        let (read, write) = cloexec_pipe().map_err(|e| {
            SubprocessError::Resource(format!("pipe allocation failed: {}", e))
        })?;
        debug!(
            "Created pipe read={} write={}",
            read.as_raw_fd(),
            write.as_raw_fd()
        );
        Ok(Self {
            read: Some(read),
            write: Some(write),
        })
    }

    /// Raw descriptor of the read end, if still owned
    pub fn read_fd(&self) -> Option<RawFd> {
        self.read.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Raw descriptor of the write end, if still owned
    pub fn write_fd(&self) -> Option<RawFd> {
        self.write.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Close the read end. Closing an already closed end is a no-op.
    pub fn close_read_end(&mut self) {
        self.read.take();
    }

    /// Close the write end. Closing an already closed end is a no-op.
    pub fn close_write_end(&mut self) {
        self.write.take();
    }

    /// Give up ownership of both ends without closing them.
    ///
    /// Ends that were already closed come back as `None`.
    pub fn disown(mut self) -> (Option<OwnedFd>, Option<OwnedFd>) {
        (self.read.take(), self.write.take())
    }
}

#[cfg(not(target_vendor = "apple"))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(target_vendor = "apple")]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (read, write) = nix::unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::fs::File;
    use std::io::{Read, Write};

    #[test]
    fn create_yields_connected_ends() {
        let pair = PipePair::create().unwrap();
        let (read, write) = pair.disown();

        let mut writer = File::from(write.unwrap());
        writer.write_all(b"through the pipe").unwrap();
        drop(writer);

        let mut reader = File::from(read.unwrap());
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "through the pipe");
    }

    #[test]
    fn ends_are_close_on_exec() {
        let pair = PipePair::create().unwrap();
        for fd in [pair.read_fd().unwrap(), pair.write_fd().unwrap()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[test]
    fn closing_an_end_is_idempotent() {
        let mut pair = PipePair::create().unwrap();
        pair.close_write_end();
        pair.close_write_end();
        assert!(pair.write_fd().is_none());
        assert!(pair.read_fd().is_some());

        pair.close_read_end();
        pair.close_read_end();
        assert!(pair.read_fd().is_none());
    }

    #[test]
    fn closing_write_end_signals_eof() {
        let mut pair = PipePair::create().unwrap();
        pair.close_write_end();

        let (read, write) = pair.disown();
        assert!(write.is_none());

        let mut buf = Vec::new();
        let n = File::from(read.unwrap()).read_to_end(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn disowned_descriptors_stay_open() {
        let pair = PipePair::create().unwrap();
        let read_fd = pair.read_fd().unwrap();
        let (read, _write) = pair.disown();

        assert!(fcntl(read_fd, FcntlArg::F_GETFD).is_ok());
        drop(read);
    }
}
