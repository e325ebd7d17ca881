/*
 * error.rs
 *
 * Every fatal condition has a named exit code. The specific numbers are
 * not a contract - only "non-zero means something died" is - but naming
 * them keeps the call sites honest and the log output greppable.
 *
 * Worker-side variants are fatal for the worker process only; the daemon
 * never sees them because errors do not cross process boundaries here.
 */

use std::fmt;
use std::io;

/* exit codes grouped by which process dies with them */
pub mod exit_codes {
    /// Bad flags or malformed arguments, reported before any side effects
    pub const USAGE: i32 = 1;
    /// Configuration file missing or unreadable
    pub const CONFIG_OPEN: i32 = 2;
    /// Read error while parsing the configuration file
    pub const CONFIG_READ: i32 = 3;
    /// fork/setsid/chdir failure while daemonizing
    pub const DAEMONIZE: i32 = 4;
    /// Could not create the inotify instance
    pub const INOTIFY_INIT: i32 = 5;
    /// Kernel handed back a non-sequential watch descriptor
    pub const WATCH_TABLE: i32 = 6;
    /// sigaction failed while installing or releasing traps
    pub const SIGNAL_SETUP: i32 = 7;
    /// Zero-length or failed read from the watch instance
    pub const INOTIFY_READ: i32 = 8;
    /// Could not fork the per-event worker
    pub const FORK: i32 = 9;
    /// Worker-only: event record could not be decoded or matched to a trick
    pub const BAD_EVENT: i32 = 10;
    /// Worker-only: assembled object path exceeded the filesystem name limit
    pub const NAME_OVERFLOW: i32 = 11;
    /// Worker-only: account lookup failed
    pub const ACCOUNT: i32 = 12;
    /// Worker-only: composed command exceeded the system line length
    pub const COMMAND_TOO_LONG: i32 = 13;
    /// Worker-only: pipe or grandchild spawn failure
    pub const SPAWN: i32 = 14;
    /// Worker-only: grandchild exit status could not be determined.
    /// EXIT_FAILURE, because there is no script status to relay.
    pub const STATUS_UNKNOWN: i32 = 1;
}

/* everything that can go wrong, daemon side and worker side */
#[derive(Debug)]
pub enum GidgetError {
    ConfigOpen(String, io::Error),
    ConfigRead(String, io::Error),
    InotifyInit(io::Error),
    /// Per-trick, non-fatal: the kernel refused the watch
    WatchAdd(String, io::Error),
    NonSequentialWatch { expected: i32, got: i32 },
    NoSuchTrick(i32),
    TruncatedEvent,
    NameOverflow,
    AccountLookup(String),
    NoShell(String),
    CommandTooLong,
    Pipe(io::Error),
    Spawn(String, io::Error),
    StatusUnknown(String),
}

impl fmt::Display for GidgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigOpen(path, e) => {
                let errno = e.raw_os_error().unwrap_or(0);
                write!(f, "Error ({errno}) opening {path}: {e}")
            }
            Self::ConfigRead(path, e) => {
                let errno = e.raw_os_error().unwrap_or(0);
                write!(f, "Error reading {path}: {e} ({errno})")
            }
            Self::InotifyInit(_) => write!(f, "Unable to initialize iNotify"),
            Self::WatchAdd(path, e) => {
                let errno = e.raw_os_error().unwrap_or(0);
                write!(f, "ERROR {errno}: Unable to add watch for {path}\t{e} ({errno})")
            }
            /* the exact wording is load-bearing: log scanners look for it */
            Self::NonSequentialWatch { expected, got } => write!(
                f,
                "FATAL ERROR! Heap corrupt, non-sequential watch descriptor \
                 returned from inotify! (expected {expected}, got {got})"
            ),
            Self::NoSuchTrick(wd) => {
                write!(f, "no trick registered for watch descriptor {wd}")
            }
            Self::TruncatedEvent => write!(f, "truncated inotify event record"),
            Self::NameOverflow => write!(f, "filesystem object name overflow!"),
            Self::AccountLookup(user) => {
                write!(f, "getpwnam_r failed to find user {user}")
            }
            Self::NoShell(user) => {
                write!(f, "unable to determine shell for user {user}")
            }
            Self::CommandTooLong => write!(f, "command too long for shell"),
            Self::Pipe(e) => write!(f, "unable to create mail pipe: {e}"),
            Self::Spawn(what, e) => write!(f, "unable to spawn {what}: {e}"),
            Self::StatusUnknown(script) => write!(
                f,
                "FATAL ERROR: unable to determine exit status of script {script}"
            ),
        }
    }
}

impl GidgetError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigOpen(_, _) => exit_codes::CONFIG_OPEN,
            Self::ConfigRead(_, _) => exit_codes::CONFIG_READ,
            Self::InotifyInit(_) => exit_codes::INOTIFY_INIT,
            Self::WatchAdd(_, _) | Self::NonSequentialWatch { .. } => exit_codes::WATCH_TABLE,
            Self::NoSuchTrick(_) | Self::TruncatedEvent => exit_codes::BAD_EVENT,
            Self::NameOverflow => exit_codes::NAME_OVERFLOW,
            Self::AccountLookup(_) | Self::NoShell(_) => exit_codes::ACCOUNT,
            Self::CommandTooLong => exit_codes::COMMAND_TOO_LONG,
            Self::Pipe(_) | Self::Spawn(_, _) => exit_codes::SPAWN,
            Self::StatusUnknown(_) => exit_codes::STATUS_UNKNOWN,
        }
    }
}

pub type Result<T> = std::result::Result<T, GidgetError>;
