/*
 * limits.rs
 *
 * Runtime system limits via sysconf/pathconf. Querying at run time beats
 * compile-time values from limits.h: the filesystem hosting a watched
 * path decides its own name length, and login name limits vary per libc.
 *
 * pathconf doubles as an existence probe: on a path that does not
 * resolve it fails, which is exactly the startup check the config
 * loader needs.
 */

use std::ffi::CString;

/* sane floors when sysconf punts with -1 (POSIX minimums) */
const FALLBACK_LINE_MAX: usize = 2048;
const FALLBACK_LOGIN_NAME_MAX: usize = 256;
const FALLBACK_GETPW_BUF: usize = 1024;

fn sysconf(name: libc::c_int, fallback: usize) -> usize {
    // SAFETY: sysconf has no preconditions; -1 means "no limit / unknown"
    let v = unsafe { libc::sysconf(name) };
    if v > 0 {
        v as usize
    } else {
        fallback
    }
}

/// Longest input line the shell is required to accept. Bounds both config
/// lines and composed commands.
#[must_use]
pub fn line_max() -> usize {
    sysconf(libc::_SC_LINE_MAX, FALLBACK_LINE_MAX)
}

/// Longest login name the system supports. Bounds the account field.
#[must_use]
pub fn login_name_max() -> usize {
    sysconf(libc::_SC_LOGIN_NAME_MAX, FALLBACK_LOGIN_NAME_MAX)
}

/// Suggested scratch-buffer size for getpwnam_r.
#[must_use]
pub fn getpw_buf_size() -> usize {
    sysconf(libc::_SC_GETPW_R_SIZE_MAX, FALLBACK_GETPW_BUF)
}

/// Maximum file name length on the filesystem hosting `path`.
///
/// Returns `None` when the query fails, which in practice means the path
/// does not exist or is unreachable. Callers treat that as a rejected
/// config line.
#[must_use]
pub fn name_max(path: &str) -> Option<usize> {
    let c_path = CString::new(path).ok()?;
    // SAFETY: c_path is a valid NUL-terminated string for the call's duration
    let v = unsafe { libc::pathconf(c_path.as_ptr(), libc::_PC_NAME_MAX) };
    if v > 0 {
        Some(v as usize)
    } else {
        None
    }
}
