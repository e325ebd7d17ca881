/*
 * worker.rs
 *
 * The per-event worker: everything that happens between the daemon's
 * fork and the worker's exit. Runs in its own process, so every fatal
 * condition here kills only this event's handling - the daemon is
 * already back in its read loop.
 *
 * Account resolution happens here, after the fork, on purpose: user
 * database edits take effect without a daemon restart, and whatever the
 * name-service backend leaks dies with the worker.
 *
 * Path assembly single-quotes the object for the shell, which is why
 * apostrophes are banned from the config and rewritten to %27 when the
 * kernel hands us one inside an event name. People really do make files
 * called "it's.txt".
 */

use std::ffi::{CStr, CString, OsStr, OsString};
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::ptr;

use crate::error::{GidgetError, Result};
use crate::event::{self, Event};
use crate::limits;
use crate::logger::logx;
use crate::mailer::{self, MessageMeta};
use crate::mask::{self, EventMask};
use crate::opts::Opts;
use crate::signals;
use crate::watch::WatchTable;

/// A resolved local account: everything the grandchild needs to become
/// that user and run from their home.
#[derive(Debug, Clone)]
pub struct Account {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Name-service lookup via getpwnam_r, growing the scratch buffer on
/// ERANGE the way the manual says to.
pub fn resolve_account(name: &str) -> Result<Account> {
    let c_name =
        CString::new(name).map_err(|_| GidgetError::AccountLookup(name.to_string()))?;

    let mut buf_len = limits::getpw_buf_size();
    loop {
        let mut buf = vec![0u8; buf_len];
        // SAFETY: pwd is plain old data and fully written by getpwnam_r
        // before use; zeroed is a valid initial state
        let mut pwd: libc::passwd = unsafe { mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();

        // SAFETY: all pointers are live for the duration of the call and
        // buf.len() honestly describes the scratch buffer
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE {
            buf_len *= 2;
            continue;
        }
        if rc != 0 || result.is_null() {
            return Err(GidgetError::AccountLookup(name.to_string()));
        }

        // SAFETY: result is non-null, so pw_dir/pw_shell point into buf,
        // which outlives these reads
        let home = unsafe { CStr::from_ptr(pwd.pw_dir) }.to_bytes().to_vec();
        let shell = unsafe { CStr::from_ptr(pwd.pw_shell) }.to_bytes().to_vec();

        if shell.is_empty() {
            return Err(GidgetError::NoShell(name.to_string()));
        }

        return Ok(Account {
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
            home: PathBuf::from(OsString::from_vec(home)),
            shell: PathBuf::from(OsString::from_vec(shell)),
        });
    }
}

/// Rewrite every apostrophe in an event name to `%27`.
#[must_use]
pub fn munge_name(name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len());
    for &b in name {
        if b == b'\'' {
            out.extend_from_slice(b"%27");
        } else {
            out.push(b);
        }
    }
    out
}

/// Build `<trick path>/<munged name>` and enforce the name-length cap
/// discovered at load time.
pub fn assemble_object_path(dir: &str, name: &[u8], max_name_len: usize) -> Result<Vec<u8>> {
    let munged = munge_name(name);
    let mut path = Vec::with_capacity(dir.len() + 1 + munged.len());
    path.extend_from_slice(dir.as_bytes());
    path.push(b'/');
    path.extend_from_slice(&munged);
    if path.len() > max_name_len {
        return Err(GidgetError::NameOverflow);
    }
    Ok(path)
}

/// Build `<script> '<object>' <mask>` with the mask as zero-padded hex.
/// The script may carry its own trailing arguments; not our business.
pub fn compose_command(script: &str, object: &[u8], mask_bits: u32) -> Result<Vec<u8>> {
    let mask_hex = format!("{mask_bits:#010x}");
    /* quotes and spaces add four bytes on top of the three parts */
    if script.len() + mask_hex.len() + object.len() + 4 > limits::line_max() {
        return Err(GidgetError::CommandTooLong);
    }

    let mut cmd = Vec::with_capacity(script.len() + object.len() + 14);
    cmd.extend_from_slice(script.as_bytes());
    cmd.extend_from_slice(b" '");
    cmd.extend_from_slice(object);
    cmd.extend_from_slice(b"' ");
    cmd.extend_from_slice(mask_hex.as_bytes());
    Ok(cmd)
}

/// Fork the grandchild: combined stdout+stderr onto one pipe, cwd at the
/// account's home, group then user dropped, image replaced by the login
/// shell running the composed command. Returns the child handle and the
/// read end of the capture pipe.
fn spawn_grandchild(account: &Account, command: &[u8]) -> Result<(Child, File)> {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid 2-element array; O_CLOEXEC keeps the read
    // end out of the grandchild
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(GidgetError::Pipe(io::Error::last_os_error()));
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    /* stderr needs its own descriptor onto the same pipe */
    // SAFETY: write_fd is the live write end created above
    let stderr_fd = unsafe { libc::dup(write_fd) };
    if stderr_fd < 0 {
        let e = io::Error::last_os_error();
        // SAFETY: both fds came from pipe2 above and are closed once
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(GidgetError::Pipe(e));
    }

    // SAFETY: each fd is owned exactly once from here on; Command consumes
    // the Stdio handles and closes them in the parent after the spawn
    let stdout = unsafe { Stdio::from_raw_fd(write_fd) };
    let stderr = unsafe { Stdio::from_raw_fd(stderr_fd) };
    let reader = unsafe { File::from_raw_fd(read_fd) };

    let mut cmd = Command::new(&account.shell);
    cmd.arg("-c")
        .arg(OsStr::from_bytes(command))
        .current_dir(&account.home)
        /* gid is applied before uid: setting uid first could revoke the
         * privilege needed to set the group */
        .gid(account.gid)
        .uid(account.uid)
        .stdout(stdout)
        .stderr(stderr);

    match cmd.spawn() {
        Ok(child) => Ok((child, reader)),
        Err(e) => Err(GidgetError::Spawn("script executor".to_string(), e)),
    }
}

/// Alarm lines for the kernel's status flags. The overflow warning
/// needs no trick (overflow pseudo-events carry watch descriptor -1 and
/// match nothing); the unmount and invalidation warnings name the
/// watched path, so they are produced once the trick is known.
#[must_use]
pub fn flag_warnings(mask: EventMask, trick_path: Option<&str>) -> Vec<String> {
    let mut warnings = Vec::new();
    match trick_path {
        None => {
            if mask.contains(EventMask::Q_OVERFLOW) {
                warnings.push("GRIEVOUS ERROR: inotify event queue overflow!".to_string());
            }
        }
        Some(path) => {
            if mask.contains(EventMask::UNMOUNT) {
                warnings.push(format!("GRIEVOUS ERROR: filesystem backing {path} unmounted!"));
            }
            if mask.contains(EventMask::IGNORED) {
                warnings.push(format!("WARNING: gidget watch on {path} deleted!"));
            }
        }
    }
    warnings
}

fn fatal(err: &GidgetError, opts: &Opts) -> ! {
    logx(err.exit_code(), opts, &err.to_string());
    unreachable!("logx with non-zero status exits");
}

/// The whole worker, from just-after-fork to exit. Never returns.
pub fn handle(
    buf: &[u8],
    table: &WatchTable,
    opts: &Opts,
    max_name_len: usize,
    daemon_pid: u32,
    watch_fd: RawFd,
) -> ! {
    /* the daemon's traps make no sense in here, least of all the SIGCHLD
     * auto-reaper - we need the grandchild's exit status */
    if let Err(sig) = signals::release() {
        logx(
            crate::error::exit_codes::SIGNAL_SETUP,
            opts,
            &format!("Unable to release {sig} trap"),
        );
    }

    /* only the daemon owns watches */
    // SAFETY: watch_fd is the inherited inotify descriptor, closed once here
    unsafe {
        libc::close(watch_fd);
    }

    if opts.verbose {
        logx(
            0,
            opts,
            &format!("spawned event child process {}", std::process::id()),
        );
    }

    let Some(ev) = event::decode_first(buf) else {
        fatal(&GidgetError::TruncatedEvent, opts);
    };

    /* dropped notifications are unrecoverable; all we can do is make
     * noise, at minimum for sysadmins, operators, and the apps */
    for warning in flag_warnings(ev.mask, None) {
        logx(0, opts, &warning);
    }

    let Some(trick) = table.lookup(ev.wd) else {
        fatal(&GidgetError::NoSuchTrick(ev.wd), opts);
    };

    for warning in flag_warnings(ev.mask, Some(&trick.path)) {
        logx(0, opts, &warning);
    }

    if opts.verbose {
        dump_event(&ev, &trick.path, opts);
    }

    let object = match assemble_object_path(&trick.path, &ev.name, max_name_len) {
        Ok(p) => p,
        Err(e) => fatal(&e, opts),
    };

    let account = match resolve_account(&trick.account) {
        Ok(a) => a,
        Err(e) => fatal(&e, opts),
    };

    let command = match compose_command(&trick.script, &object, ev.mask.bits()) {
        Ok(c) => c,
        Err(e) => fatal(&e, opts),
    };
    let command_display = String::from_utf8_lossy(&command).into_owned();

    if opts.verbose {
        logx(
            0,
            opts,
            &format!(
                "parentpid [{daemon_pid}] watch {}, mask {}, user {}, home {}, shell {}, mail {}, {}",
                ev.wd,
                ev.mask.bits(),
                trick.account,
                account.home.display(),
                account.shell.display(),
                trick.mail_to,
                command_display
            ),
        );
    } else {
        logx(
            0,
            opts,
            &format!(
                "Executing {} using shell {} with output to {}",
                command_display,
                account.shell.display(),
                trick.mail_to
            ),
        );
    }

    let (grandchild, mut pipe) = match spawn_grandchild(&account, &command) {
        Ok(pair) => pair,
        Err(e) => fatal(&e, opts),
    };

    let meta = MessageMeta {
        account: &trick.account,
        mail_to: &trick.mail_to,
        object: &object,
        watch_id: ev.wd,
        mask_bits: ev.mask.bits(),
        shell: account.shell.as_os_str(),
        command: &command,
    };

    match mailer::capture_and_mail(&mut pipe, &meta, mailer::transport_command()) {
        Ok(None) => { /* silent scripts stay silent */ }
        Ok(Some(mailed)) => {
            logx(
                0,
                opts,
                &format!(
                    "parentpid [{daemon_pid}] mailed {mailed} bytes of output to {}",
                    mailer::MAIL_TRANSPORT
                ),
            );
        }
        Err(e) => {
            /* delivery trouble must not stop the status accounting */
            logx(0, opts, &format!("mail delivery failed: {e}"));
        }
    }

    mailer::reap_and_exit(grandchild, &trick.script, &command_display, opts);
}

fn dump_event(ev: &Event, path: &str, opts: &Opts) {
    let name = String::from_utf8_lossy(&ev.name);
    let subject = if ev.name.is_empty() {
        path.to_string()
    } else {
        format!("{path}/{name}")
    };
    logx(
        0,
        opts,
        &format!(
            "{subject} watch={} mask={} cookie={} len={}",
            ev.wd,
            ev.mask.bits(),
            ev.cookie,
            ev.name.len()
        ),
    );
    logx(0, opts, &mask::describe(ev.mask));
}
