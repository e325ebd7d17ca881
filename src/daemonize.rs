/*
 * daemonize.rs
 *
 * Classic double-life daemonization: the original process forks, writes
 * the child's pid to the pid file, and exits; the child becomes session
 * leader, detaches stdin, and moves to the filesystem root. Log
 * redirection happened earlier (the config file is opened and the logs
 * pointed at their file before the fork, so relative -c paths work and
 * a bad config never leaves stray pid files behind).
 *
 * If the pid file cannot be created the parent kills the fresh daemon
 * before dying: an unsupervisable daemon is worse than none.
 */

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::process;

use crate::error::exit_codes;
use crate::logger::logx;
use crate::opts::Opts;

/// Paranoid creation mask: pid and log files must not be world-readable.
/// Called before anything touches the filesystem.
pub fn set_umask() {
    // SAFETY: umask cannot fail
    unsafe {
        libc::umask(0o027);
    }
}

/// Detach into daemon mode. Returns in the daemon child; the original
/// parent exits inside.
pub fn daemonize(opts: &Opts) {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    // SAFETY: fork has no preconditions at this point; we are still
    // single-threaded
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        logx(exit_codes::DAEMONIZE, opts, "Unable to fork daemon process");
    }

    if pid > 0 {
        /* original parent: record the daemon's pid, then get out of the way */
        match File::create(&opts.pidfile) {
            Ok(mut f) => {
                let _ = writeln!(f, "{pid}");
            }
            Err(_) => {
                /* up with this we will not put */
                // SAFETY: pid is the live child we just forked
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
                logx(
                    exit_codes::DAEMONIZE,
                    opts,
                    "Could not create pid file, killing daemon",
                );
            }
        }
        process::exit(0);
    }

    /* daemon child from here on */
    // SAFETY: setsid has no preconditions in a freshly forked child
    if unsafe { libc::setsid() } < 0 {
        logx(exit_codes::DAEMONIZE, opts, "Unable to set new process group");
    }

    /* a daemon needs no keyboard */
    if let Ok(null) = File::open("/dev/null") {
        // SAFETY: both descriptors are live; dup2 replaces stdin atomically
        unsafe {
            libc::dup2(null.as_raw_fd(), libc::STDIN_FILENO);
        }
    }

    if std::env::set_current_dir("/").is_err() {
        logx(
            exit_codes::DAEMONIZE,
            opts,
            "Unable to change working directory to root",
        );
    }
}
