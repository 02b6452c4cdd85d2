//! posix_spawn with a descriptor redirection plan
//!
//! The working directory is process-wide state, so a per-spawn override is
//! applied by changing it around the spawn call. Every spawn runs under one
//! global lock so no child can observe another spawn's temporary directory.

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use libc::c_char;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal};
use nix::unistd::{chdir, Pid};

use crate::errors::{Result, SubprocessError};
use crate::execution::redirect::FileAction;

static SPAWN_LOCK: Mutex<()> = Mutex::new(());

fn spawn_guard() -> MutexGuard<'static, ()> {
    SPAWN_LOCK
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

/// Current directory, read while no spawn can be changing it
pub(crate) fn current_dir_between_spawns() -> std::io::Result<PathBuf> {
    let _lock = spawn_guard();
    std::env::current_dir()
}

/// Everything the child needs, already resolved by the builder
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    /// Executable path handed to posix_spawn
    pub program: &'a Path,
    /// Full argument vector, element 0 included
    pub argv: &'a [String],
    /// Replacement environment; `None` inherits the parent's
    pub env: Option<&'a [(String, String)]>,
    pub cwd: Option<&'a Path>,
    pub actions: &'a [FileAction],
}

/// Spawn the child described by `request` and return its pid
pub fn spawn_with_plan(request: &SpawnRequest<'_>) -> Result<Pid> {
    let program_name = request.program.display().to_string();
    let program = to_cstring(request.program.as_os_str())?;

    let argv: Vec<CString> = request
        .argv
        .iter()
        .map(|arg| to_cstring(OsStr::new(arg)))
        .collect::<Result<_>>()?;

    let envp: Vec<CString> = match request.env {
        Some(vars) => vars
            .iter()
            .map(|(key, value)| env_entry(OsStr::new(key), OsStr::new(value)))
            .collect::<Result<_>>()?,
        None => std::env::vars_os()
            .map(|(key, value)| env_entry(&key, &value))
            .collect::<Result<_>>()?,
    };

    let argv_ptrs = null_terminated(&argv);
    let envp_ptrs = null_terminated(&envp);

    let mut file_actions = FileActions::new()?;
    for action in request.actions {
        file_actions.add(action)?;
    }
    let attributes = SpawnAttributes::new()?;

    let mut pid: libc::pid_t = 0;
    let ret = {
        let _lock = spawn_guard();
        let _cwd = match request.cwd {
            Some(dir) => Some(CwdGuard::enter(dir).map_err(|source| SubprocessError::Spawn {
                program: format!("{} (cwd {})", program_name, dir.display()),
                source,
            })?),
            None => None,
        };

        // SAFETY: every pointer refers to a live, NUL-terminated CString or a
        // NULL-terminated array of them, all of which outlive the call.
        unsafe {
            libc::posix_spawn(
                &mut pid,
                program.as_ptr(),
                file_actions.as_ptr(),
                attributes.as_ptr(),
                argv_ptrs.as_ptr(),
                envp_ptrs.as_ptr(),
            )
        }
    };

    if ret != 0 {
        return Err(SubprocessError::Spawn {
            program: program_name,
            source: Errno::from_raw(ret),
        });
    }

    debug!("Spawned {} as pid {}", program_name, pid);
    Ok(Pid::from_raw(pid))
}

fn to_cstring(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| {
        SubprocessError::InvalidArgument(format!(
            "{:?} contains an interior nul byte",
            value
        ))
    })
}

fn env_entry(key: &OsStr, value: &OsStr) -> Result<CString> {
    if key.is_empty() || key.as_bytes().contains(&b'=') {
        return Err(SubprocessError::InvalidArgument(format!(
            "invalid environment variable name {:?}",
            key
        )));
    }
    let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
    entry.extend_from_slice(key.as_bytes());
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());
    to_cstring(OsStr::from_bytes(&entry))
}

fn null_terminated(strings: &[CString]) -> Vec<*mut c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr() as *mut c_char)
        .chain(std::iter::once(ptr::null_mut()))
        .collect()
}

/// Owned `posix_spawn_file_actions_t`, destroyed on drop
struct FileActions {
    raw: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Result<Self> {
        // SAFETY: zeroed storage is a valid argument for init, which fully
        // initializes it before any other use.
        let mut raw: libc::posix_spawn_file_actions_t = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::posix_spawn_file_actions_init(&mut raw) };
        if ret != 0 {
            return Err(SubprocessError::Resource(format!(
                "posix_spawn_file_actions_init failed: {}",
                Errno::from_raw(ret)
            )));
        }
        Ok(Self { raw })
    }

    fn add(&mut self, action: &FileAction) -> Result<()> {
        // SAFETY: self.raw was initialized in new() and is not yet destroyed.
        let ret = unsafe {
            match *action {
                FileAction::Close(fd) => libc::posix_spawn_file_actions_addclose(&mut self.raw, fd),
                FileAction::Dup2 { from, to } => {
                    libc::posix_spawn_file_actions_adddup2(&mut self.raw, from, to)
                }
            }
        };
        if ret != 0 {
            return Err(SubprocessError::Resource(format!(
                "failed to schedule {:?}: {}",
                action,
                Errno::from_raw(ret)
            )));
        }
        Ok(())
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.raw
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.raw);
        }
    }
}

/// Owned `posix_spawnattr_t` that gives the child a clean signal state.
///
/// SIGPIPE goes back to its default action and the signal mask is emptied, so
/// the child does not inherit the ignored SIGPIPE of a Rust parent or the mask
/// of the spawning thread.
struct SpawnAttributes {
    raw: libc::posix_spawnattr_t,
}

impl SpawnAttributes {
    fn new() -> Result<Self> {
        // SAFETY: zeroed storage is a valid argument for init.
        let mut raw: libc::posix_spawnattr_t = unsafe { std::mem::zeroed() };
        check_attr("posix_spawnattr_init", unsafe {
            libc::posix_spawnattr_init(&mut raw)
        })?;
        let mut attributes = Self { raw };

        let mut sigpipe = SigSet::empty();
        sigpipe.add(Signal::SIGPIPE);
        let no_signals = SigSet::empty();
        let default_signals: &libc::sigset_t = sigpipe.as_ref();
        let empty_mask: &libc::sigset_t = no_signals.as_ref();
        let flags = (libc::POSIX_SPAWN_SETSIGDEF | libc::POSIX_SPAWN_SETSIGMASK) as libc::c_short;

        // SAFETY: raw is initialized and the sets are valid for each call.
        unsafe {
            check_attr(
                "posix_spawnattr_setsigdefault",
                libc::posix_spawnattr_setsigdefault(&mut attributes.raw, default_signals),
            )?;
            check_attr(
                "posix_spawnattr_setsigmask",
                libc::posix_spawnattr_setsigmask(&mut attributes.raw, empty_mask),
            )?;
            check_attr(
                "posix_spawnattr_setflags",
                libc::posix_spawnattr_setflags(&mut attributes.raw, flags),
            )?;
        }
        Ok(attributes)
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.raw
    }
}

impl Drop for SpawnAttributes {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.raw);
        }
    }
}

fn check_attr(call: &str, ret: libc::c_int) -> Result<()> {
    if ret != 0 {
        return Err(SubprocessError::Resource(format!(
            "{} failed: {}",
            call,
            Errno::from_raw(ret)
        )));
    }
    Ok(())
}

/// Changes the process working directory and restores it on drop.
///
/// Only sound while [`SPAWN_LOCK`] is held. Refuses to move when the current
/// directory cannot be read, since it could not be restored afterwards.
struct CwdGuard {
    previous: PathBuf,
}

impl CwdGuard {
    fn enter(dir: &Path) -> nix::Result<Self> {
        let previous = std::env::current_dir()
            .map_err(|e| e.raw_os_error().map_or(Errno::EIO, Errno::from_raw))?;
        chdir(dir)?;
        Ok(Self { previous })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Err(e) = chdir(self.previous.as_path()) {
            warn!(
                "Failed to restore working directory {}: {}",
                self.previous.display(),
                e
            );
        }
    }
}
