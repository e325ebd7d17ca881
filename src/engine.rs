/*
 * engine.rs
 *
 * The event-wait loop. Strictly single-threaded: block in read, decode
 * nothing, fork a worker, go straight back to read. The worker process
 * does all per-event work on its fork-inherited snapshot of the buffer
 * and trick table.
 *
 * A signal-interrupted read is normal control flow, not an error:
 * SIGHUP means logrotate wants the log files reopened, anything else
 * means shut down cleanly. A zero or negative read is the kernel
 * telling us the watch instance is gone, and that is the end.
 */

use std::io::ErrorKind;
use std::process;

use crate::error::exit_codes;
use crate::event;
use crate::logger::{self, logx};
use crate::opts::Opts;
use crate::signals;
use crate::watch::{WatchInstance, WatchTable};
use crate::worker;

fn shutdown(instance: WatchInstance, opts: &Opts) -> ! {
    logx(0, opts, "gidget event wait terminated by signal, shutting down.");
    drop(instance);
    if opts.syslog.is_some() {
        logger::close_syslog();
    }
    process::exit(0);
}

/// Run the daemon's read/fork loop forever. Exits the process on signal
/// or kernel failure; the only way out is out.
pub fn run(
    instance: WatchInstance,
    table: WatchTable,
    opts: &Opts,
    max_name_len: usize,
    daemon_pid: u32,
) -> ! {
    /* sized for exactly one maximal event record: header plus the
     * longest name any watched filesystem can produce, plus its NUL */
    let buf_size = event::HEADER_LEN + max_name_len + 1;
    let mut buf = vec![0u8; buf_size];

    loop {
        match instance.read_events(&mut buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                let sig = signals::take_caught();

                if sig == libc::SIGHUP {
                    let mut msg = format!("Caught signal {sig}");
                    if opts.log_to_file {
                        msg.push_str(", reopening stdout/stderr");
                        logx(0, opts, &msg);
                        logger::reopen_logs(opts);
                    } else {
                        msg.push_str(", ignored.");
                        logx(0, opts, &msg);
                    }
                    continue;
                }

                if sig == libc::SIGINT {
                    logx(0, opts, &format!("Caught signal {sig}, probably Control-C"));
                }
                shutdown(instance, opts);
            }
            Err(e) => {
                logx(
                    exit_codes::INOTIFY_READ,
                    opts,
                    &format!("inotify returned -1, FAIL, daemon dead ({e})"),
                );
            }
            Ok(0) => {
                logx(
                    exit_codes::INOTIFY_READ,
                    opts,
                    "zero length string returned from inotify, daemon dead",
                );
            }
            Ok(n) => {
                /* one fork per event, in kernel delivery order */
                // SAFETY: fork has no preconditions; the child branch never
                // returns to this loop
                match unsafe { libc::fork() } {
                    -1 => {
                        logx(
                            exit_codes::FORK,
                            opts,
                            "failed to fork script executor child process!",
                        );
                    }
                    0 => {
                        worker::handle(&buf[..n], &table, opts, max_name_len, daemon_pid, instance.fd());
                    }
                    _ => { /* parent: straight back to the read */ }
                }
            }
        }
    }
}
