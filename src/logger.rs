/*
 * logger.rs
 *
 * One logging primitive, logx: stamp a line, pick a stream by status,
 * optionally mirror to syslog, and terminate the process when the status
 * is non-zero. Fatal conditions anywhere in gidget route through here,
 * which is what guarantees the system log sees a terminating line.
 *
 * Operators have log scanners keyed on the two empty-text fallback
 * strings; do not reword them.
 *
 * Line shape: gidget[pid]: YYYY-MM-DD HH:MM:SS <text>
 */

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::process;

use chrono::Local;

use crate::error::exit_codes;
use crate::opts::Opts;

/* substituted when a caller passes empty text; preserved verbatim */
const MISSING_OK_TEXT: &str = "Missing log string. This should not happen.";
const MISSING_ERR_TEXT: &str = "The sky is falling!  The sky is falling!";

/* openlog keeps the ident pointer, so it must live forever */
static SYSLOG_IDENT: &[u8] = b"gidget\0";

/// Connect to syslog. Call once at startup when -s was given.
pub fn open_syslog() {
    // SAFETY: SYSLOG_IDENT is a static NUL-terminated byte string
    unsafe {
        libc::openlog(
            SYSLOG_IDENT.as_ptr().cast(),
            libc::LOG_CONS | libc::LOG_PID,
            libc::LOG_DAEMON,
        );
    }
}

/// Disconnect from syslog at clean shutdown.
pub fn close_syslog() {
    // SAFETY: closelog has no preconditions
    unsafe {
        libc::closelog();
    }
}

fn effective_text(status: i32, text: &str) -> &str {
    if !text.is_empty() {
        text
    } else if status == 0 {
        MISSING_OK_TEXT
    } else {
        MISSING_ERR_TEXT
    }
}

fn stamp_line(pid: u32, stamp: &str, text: &str) -> String {
    format!("gidget[{pid}]: {stamp} {text}")
}

/// Write one stamped log line; exit the process when `status` is non-zero.
///
/// Status zero goes to stdout, anything else to stderr. When syslog is
/// enabled the same line is submitted at the configured priority. The
/// opposite stream is flushed first so interleaved output stays ordered
/// in a shared log file.
pub fn logx(status: i32, opts: &Opts, text: &str) {
    let text = effective_text(status, text);
    let stamp = Local::now().format("%F %T").to_string();
    let line = stamp_line(process::id(), &stamp, text);

    if status == 0 {
        let _ = io::stderr().flush();
        println!("{line}");
        let _ = io::stdout().flush();
    } else {
        let _ = io::stdout().flush();
        eprintln!("{line}");
        let _ = io::stderr().flush();
    }

    if let Some(level) = opts.syslog {
        /* interior NULs cannot occur in our own formatting, but an event
         * name is kernel-supplied bytes, so stay defensive about CString */
        if let Ok(c_line) = CString::new(line) {
            // SAFETY: both pointers are valid NUL-terminated strings; "%s"
            // keeps user-controlled text out of the format string
            unsafe {
                libc::syslog(
                    libc::c_int::from(level),
                    b"%s\0".as_ptr().cast(),
                    c_line.as_ptr(),
                );
            }
        }
    }

    if status != 0 {
        process::exit(status);
    }
}

/// Point stdout and stderr at the configured log file (append, create).
///
/// Called at startup when logging to file, and again from the event loop
/// on SIGHUP so logrotate can move the old file out from under us.
pub fn reopen_logs(opts: &Opts) {
    let file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&opts.logfile)
    {
        Ok(f) => f,
        Err(e) => {
            let errno = e.raw_os_error().unwrap_or(0);
            logx(
                exit_codes::USAGE,
                opts,
                &format!(
                    "Error ({errno}) opening {} for stdout: {e}",
                    opts.logfile.display()
                ),
            );
            unreachable!("logx with non-zero status exits");
        }
    };

    let fd = file.as_raw_fd();
    // SAFETY: fd is a freshly opened file descriptor; dup2 onto the
    // standard streams atomically replaces them. The File is dropped
    // afterwards, which closes only the original descriptor.
    unsafe {
        if libc::dup2(fd, libc::STDOUT_FILENO) < 0 || libc::dup2(fd, libc::STDERR_FILENO) < 0 {
            let e = io::Error::last_os_error();
            let errno = e.raw_os_error().unwrap_or(0);
            logx(
                exit_codes::USAGE,
                opts,
                &format!(
                    "Error ({errno}) opening {} for stderr: {e}",
                    opts.logfile.display()
                ),
            );
        }
    }
}
