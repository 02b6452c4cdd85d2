//! Helpers around the spawn core: program lookup and command presentation

use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};

use crate::execution::spawn::current_dir_between_spawns;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Resolve a program name to an executable path using PATH semantics.
///
/// Names containing a `/` are taken as paths (relative ones are anchored to
/// the current directory so a later working-directory change cannot alter
/// them). Bare names are searched in the `PATH` of `env` when a replacement
/// environment is given, otherwise in the parent's `PATH`.
pub fn resolve_program_path(program: &str, env: Option<&[(String, String)]>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    if program.contains('/') {
        let path = Path::new(program);
        let path = if path.is_relative() {
            current_dir_between_spawns().ok()?.join(path)
        } else {
            path.to_path_buf()
        };
        return is_executable(&path).then_some(path);
    }

    let path_value: OsString = match env {
        Some(vars) => vars
            .iter()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| OsString::from(value))
            .unwrap_or_else(|| OsString::from(DEFAULT_PATH)),
        None => std::env::var_os("PATH").unwrap_or_else(|| OsString::from(DEFAULT_PATH)),
    };

    std::env::split_paths(&path_value)
        .filter_map(|dir| {
            if dir.is_relative() {
                current_dir_between_spawns().ok().map(|cwd| cwd.join(dir))
            } else {
                Some(dir)
            }
        })
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | ',' | '+' | '@' | '%')
}

/// Quote a single argument for display in a POSIX shell command line
pub fn quote_argument(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() {
        return Cow::Borrowed("''");
    }
    if arg.chars().all(is_shell_safe) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
}

/// Render a command line as a single shell-quoted string
pub fn join_command<S: AsRef<str>>(command: &[S]) -> String {
    command
        .iter()
        .map(|arg| quote_argument(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
