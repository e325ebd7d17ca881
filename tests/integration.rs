/*
 * Integration tests for the gidget CLI and daemon.
 *
 * The CLI checks go through assert_cmd. The daemon checks spawn the real
 * binary against a scratch config, watch its log output on a pipe, poke
 * the watched directory, and shut it down with SIGTERM - the same
 * lifecycle an init script drives.
 *
 * Mail delivery is not asserted here: the build machine has no sendmail,
 * and gidget logs the delivery failure and carries on, which is itself
 * the behavior under test.
 */

use assert_cmd::Command;
use predicates::prelude::*;
use std::ffi::CStr;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[allow(deprecated)]
fn gidget_cmd() -> Command {
    Command::cargo_bin("gidget").unwrap()
}

/* =========================================================================
 * CLI SURFACE - flags, usage, version
 * ========================================================================= */

#[test]
fn test_version_flag_exits_zero() {
    gidget_cmd()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("gidget"));
}

#[test]
fn test_usage_flag_exits_zero() {
    gidget_cmd()
        .arg("-?")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_flag_exits_one() {
    /*
     * Usage errors are contractually exit 1, before any side effects.
     * Wrapper scripts distinguish 1 (bad invocation) from 2+ (runtime).
     */
    gidget_cmd().arg("-z").assert().code(1);
}

#[test]
fn test_bad_syslog_level_exits_one() {
    gidget_cmd().args(["-s", "9"]).assert().code(1);
}

#[test]
fn test_missing_config_is_fatal() {
    /* a missing config must die before creating pid or log files */
    gidget_cmd()
        .args(["-c", "/no/such/gidget_zz.conf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("opening /no/such/gidget_zz.conf"));
}

#[test]
fn test_positional_config_fallback() {
    /* undocumented but load-bearing: bare positional is the config path */
    gidget_cmd()
        .arg("/no/such/gidget_zz.conf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/no/such/gidget_zz.conf"));
}

/* =========================================================================
 * DAEMON LIFECYCLE - spawn, watch, signal, shut down
 * ========================================================================= */

/* the account every grandchild runs as: whoever is running the tests,
 * so the uid/gid transition is always permitted */
fn current_user() -> String {
    // SAFETY: getpwuid returns a static-lifetime record or NULL; we only
    // read the name out of it immediately
    unsafe {
        let pwd = libc::getpwuid(libc::getuid());
        assert!(!pwd.is_null(), "current uid must resolve");
        CStr::from_ptr((*pwd).pw_name).to_string_lossy().into_owned()
    }
}

struct Daemon {
    child: Child,
    lines: mpsc::Receiver<String>,
    collected: Vec<String>,
}

impl Daemon {
    fn start(config_path: &std::path::Path) -> Self {
        let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_gidget"))
            .arg("-c")
            .arg(config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("daemon should spawn");

        /* both streams feed one channel; logx interleaves them anyway */
        let (tx, rx) = mpsc::channel();
        let stdout = child.stdout.take().unwrap();
        let tx2 = tx.clone();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                if tx2.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr = child.stderr.take().unwrap();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Daemon {
            child,
            lines: rx,
            collected: Vec::new(),
        }
    }

    /* wait until some log line satisfies the predicate */
    fn expect_line(&mut self, what: &str, pred: impl Fn(&str) -> bool) -> String {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for: {what}\nseen: {:#?}", self.collected));
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    self.collected.push(line.clone());
                    if pred(&line) {
                        return line;
                    }
                }
                Err(_) => panic!("log closed waiting for: {what}\nseen: {:#?}", self.collected),
            }
        }
    }

    /* SIGTERM until it dies; repeated because a signal landing between
     * trap installation and the first blocking read only sets the flag */
    fn terminate(mut self) -> (std::process::ExitStatus, Vec<String>) {
        let pid = self.child.id() as libc::pid_t;
        let status = loop {
            // SAFETY: pid is our own child; worst case the signal races
            // its exit and ESRCH is ignored
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
            std::thread::sleep(Duration::from_millis(200));
            if let Some(status) = self.child.try_wait().expect("try_wait") {
                break status;
            }
        };
        while let Ok(line) = self.lines.recv_timeout(Duration::from_millis(500)) {
            self.collected.push(line);
        }
        (status, self.collected)
    }
}

#[test]
fn test_malformed_lines_discarded_then_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("gidget.conf");
    let mut config = std::fs::File::create(&config_path).unwrap();
    writeln!(config, "# exercise the loader").unwrap();
    writeln!(config).unwrap();
    writeln!(config, "{}:256:/bin/true:nobody", dir.path().display()).unwrap();
    writeln!(
        config,
        "{}:256:/bin/true:{}:ops@example.test",
        dir.path().display(),
        current_user()
    )
    .unwrap();
    drop(config);

    let mut daemon = Daemon::start(&config_path);
    daemon.expect_line("startup", |l| l.contains("daemon initialization"));
    daemon.expect_line("discard diagnostic", |l| {
        l.contains("discarding") && l.contains("line 3")
    });

    let (status, _) = daemon.terminate();
    assert_eq!(status.code(), Some(0), "signal shutdown is a normal exit");
}

#[test]
fn test_shutdown_line_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("gidget.conf");
    std::fs::write(
        &config_path,
        format!(
            "{}:256:/bin/true:{}:ops@example.test\n",
            dir.path().display(),
            current_user()
        ),
    )
    .unwrap();

    let mut daemon = Daemon::start(&config_path);
    daemon.expect_line("startup", |l| l.contains("daemon initialization"));

    let (status, lines) = daemon.terminate();
    assert_eq!(status.code(), Some(0));
    assert!(
        lines.iter().any(|l| l.contains("terminated by signal, shutting down")),
        "shutdown must be announced: {lines:#?}"
    );
}

#[test]
fn test_create_event_runs_script_with_munged_quoting() {
    /*
     * Mask 256 = IN_CREATE. Touching a file must produce exactly the
     * command shape scripts were written against:
     *
     *   <script> '<dir>/<file>' 0x00000100
     *
     * and an apostrophe in the file name must arrive as %27.
     */
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("inbox");
    std::fs::create_dir(&watched).unwrap();

    let config_path = dir.path().join("gidget.conf");
    std::fs::write(
        &config_path,
        format!(
            "{}:256:/bin/echo hello:{}:ops@example.test\n",
            watched.display(),
            current_user()
        ),
    )
    .unwrap();

    let mut daemon = Daemon::start(&config_path);
    daemon.expect_line("startup", |l| l.contains("daemon initialization"));

    /* the watch exists before the read loop starts, so this event
     * cannot be lost even if it beats the first read */
    std::fs::write(watched.join("a.txt"), b"payload").unwrap();

    let expected = format!("/bin/echo hello '{}/a.txt' 0x00000100", watched.display());
    daemon.expect_line("exec line", |l| {
        l.contains("Executing") && l.contains(&expected)
    });

    std::fs::write(watched.join("it's.txt"), b"payload").unwrap();
    let munged = format!("{}/it%27s.txt", watched.display());
    daemon.expect_line("munged exec line", |l| l.contains(&munged));

    let (status, _) = daemon.terminate();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn test_failing_script_logged_and_daemon_continues() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("inbox");
    std::fs::create_dir(&watched).unwrap();

    let config_path = dir.path().join("gidget.conf");
    std::fs::write(
        &config_path,
        format!(
            "{}:256:/bin/sh -ec \"echo boom 1>&2; exit 3\":{}:ops@example.test\n",
            watched.display(),
            current_user()
        ),
    )
    .unwrap();

    let mut daemon = Daemon::start(&config_path);
    daemon.expect_line("startup", |l| l.contains("daemon initialization"));

    std::fs::write(watched.join("first"), b"").unwrap();
    daemon.expect_line("script failure", |l| {
        l.contains("script fail") && l.contains("returned status 3")
    });

    /* a dead worker must not take the daemon with it */
    std::fs::write(watched.join("second"), b"").unwrap();
    daemon.expect_line("second event", |l| {
        l.contains("Executing") && l.contains("second")
    });

    let (status, _) = daemon.terminate();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn test_sighup_reopens_log_file() {
    /*
     * The logrotate handshake: rotate the file out from under the
     * daemon, send SIGHUP, and the daemon must reopen its log path and
     * keep writing there. The "reopening" announcement itself lands in
     * the old (renamed) file because it is logged before the reopen.
     */
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("inbox");
    std::fs::create_dir(&watched).unwrap();
    let log_path = dir.path().join("gidget.log");

    let config_path = dir.path().join("gidget.conf");
    std::fs::write(
        &config_path,
        format!(
            "{}:256:/bin/true:{}:ops@example.test\n",
            watched.display(),
            current_user()
        ),
    )
    .unwrap();

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_gidget"))
        .arg("-c")
        .arg(&config_path)
        .arg("-l")
        .arg(&log_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let wait_for = |path: &std::path::Path, needle: &str| {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Ok(text) = std::fs::read_to_string(path) {
                if text.contains(needle) {
                    return text;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for {needle:?} in {path:?}");
            std::thread::sleep(Duration::from_millis(50));
        }
    };

    wait_for(&log_path, "daemon initialization");
    /* give the loop time to reach its blocking read */
    std::thread::sleep(Duration::from_millis(300));

    let rotated = dir.path().join("gidget.log.1");
    std::fs::rename(&log_path, &rotated).unwrap();
    // SAFETY: signalling our own child
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGHUP);
    }

    wait_for(&rotated, "reopening stdout/stderr");

    /* the next event's log lines must land in the fresh file */
    std::fs::write(watched.join("after-rotate"), b"").unwrap();
    wait_for(&log_path, "Executing");

    // SAFETY: signalling our own child
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(s) = child.try_wait().unwrap() {
            break s;
        }
        if Instant::now() > deadline {
            // SAFETY: signalling our own child again
            unsafe {
                libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    };
    assert_eq!(status.code(), Some(0));
}

#[test]
fn test_silent_script_sends_no_mail_line() {
    /* /bin/true writes nothing, so no mailed-bytes accounting and no
     * delivery attempt may appear */
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("inbox");
    std::fs::create_dir(&watched).unwrap();

    let config_path = dir.path().join("gidget.conf");
    std::fs::write(
        &config_path,
        format!(
            "{}:256:/bin/true:{}:ops@example.test\n",
            watched.display(),
            current_user()
        ),
    )
    .unwrap();

    let mut daemon = Daemon::start(&config_path);
    daemon.expect_line("startup", |l| l.contains("daemon initialization"));

    std::fs::write(watched.join("quiet"), b"").unwrap();
    daemon.expect_line("completion", |l| {
        l.contains("script executor grandchild process successful completion")
    });

    let (status, lines) = daemon.terminate();
    assert_eq!(status.code(), Some(0));
    assert!(
        !lines.iter().any(|l| l.contains("mailed") || l.contains("mail delivery")),
        "no mail activity for silent success: {lines:#?}"
    );
}
