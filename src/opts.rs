/*
 * opts.rs
 *
 * Clap derive macros handle parsing. Life's too short to do this by hand.
 *
 * Two quirks kept from long-standing field usage:
 *   - a bare positional argument is accepted as the config path (people
 *     have init scripts that rely on it, so it stays, undocumented)
 *   - -s takes an optional level; plain -s means level 3
 *
 * Usage errors must exit 1, not clap's default 2 - existing wrappers
 * test for 1 - so parsing goes through try_parse and remaps.
 */

use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/gidget.conf";
pub const DEFAULT_LOG_FILE: &str = "/var/log/gidget";
pub const DEFAULT_PID_FILE: &str = "/var/run/gidget.pid";

#[derive(Parser, Debug)]
#[command(
    name = "gidget",
    version,
    disable_version_flag = true,
    about = "Run programs when specific filesystem events occur",
    long_about = "Run programs when specific filesystem events occur.\n\n\
                  Each line of the configuration file binds one watched path to one\n\
                  action:\n\n\
                    path:event-mask:script:account:mail-to\n\n\
                  When a watched event fires, the script runs through the account's\n\
                  login shell and any output it produces is mailed to the recipient.\n\
                  Choose the minimum event mask that works: the kernel event queue\n\
                  is finite and overflow silently discards notifications.",
    after_help = "NOTE syslog levels are 0-7, higher number indicating lower priority.\n\n\
                  Warnings and significant events will be logged to stdout unless\n\
                  a logfile is requested or gidget is running as a daemon."
)]
struct Cli {
    /// Override default configuration file
    #[arg(short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run as a system daemon, using pid & log files
    #[arg(short = 'd')]
    daemon: bool,

    /// Override default error and event logging
    #[arg(short = 'l', value_name = "FILE")]
    logfile: Option<PathBuf>,

    /// Override default daemon process id file
    #[arg(short = 'p', value_name = "FILE")]
    pidfile: Option<PathBuf>,

    /// Use syslog to log events at level N (plain -s means 3)
    #[arg(
        short = 's',
        value_name = "N",
        num_args = 0..=1,
        default_missing_value = "3",
        value_parser = clap::value_parser!(u8).range(0..=7)
    )]
    syslog: Option<u8>,

    /// Print version string
    #[arg(short = 'V', action = ArgAction::Version)]
    version: Option<bool>,

    /// Be exceptionally verbose
    #[arg(short = 'v')]
    verbose: bool,

    /// Print usage
    #[arg(short = '?', long = "usage", action = ArgAction::Help)]
    usage: Option<bool>,

    /// Configuration file, positional form
    #[arg(value_name = "CONFIG", hide = true)]
    config_positional: Option<PathBuf>,
}

/// Resolved invocation options, shared by every process gidget forks.
#[derive(Debug, Clone)]
pub struct Opts {
    pub daemon: bool,
    pub verbose: bool,
    pub log_to_file: bool,
    /// Syslog priority 0-7 when set; `None` disables syslog entirely
    pub syslog: Option<u8>,
    pub config: PathBuf,
    pub logfile: PathBuf,
    pub pidfile: PathBuf,
}

impl Opts {
    fn from_cli(cli: Cli) -> Self {
        /* -c wins over the positional form when both are given */
        let config = cli
            .config
            .or(cli.config_positional)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Opts {
            daemon: cli.daemon,
            verbose: cli.verbose,
            /* daemon mode always logs to file; -l alone also turns it on */
            log_to_file: cli.daemon || cli.logfile.is_some(),
            syslog: cli.syslog,
            config,
            logfile: cli.logfile.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            pidfile: cli.pidfile.unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)),
        }
    }
}

/// Parse the process arguments, exiting on help/version (0) or usage error (1).
#[must_use]
pub fn parse() -> Opts {
    match Cli::try_parse() {
        Ok(cli) => Opts::from_cli(cli),
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => crate::error::exit_codes::USAGE,
            };
            let _ = e.print();
            process::exit(code);
        }
    }
}

/// Same parse without the process exit, for tests.
pub fn try_parse_from<I, T>(args: I) -> Result<Opts, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map(Opts::from_cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = try_parse_from(["gidget"]).unwrap();
        assert!(!o.daemon);
        assert!(!o.verbose);
        assert!(!o.log_to_file);
        assert_eq!(o.syslog, None);
        assert_eq!(o.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(o.logfile, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(o.pidfile, PathBuf::from(DEFAULT_PID_FILE));
    }

    #[test]
    fn test_daemon_implies_log_to_file() {
        let o = try_parse_from(["gidget", "-d"]).unwrap();
        assert!(o.daemon);
        assert!(o.log_to_file);
    }

    #[test]
    fn test_logfile_implies_log_to_file() {
        let o = try_parse_from(["gidget", "-l", "/tmp/g.log"]).unwrap();
        assert!(!o.daemon);
        assert!(o.log_to_file);
        assert_eq!(o.logfile, PathBuf::from("/tmp/g.log"));
    }

    #[test]
    fn test_syslog_default_level() {
        let o = try_parse_from(["gidget", "-s"]).unwrap();
        assert_eq!(o.syslog, Some(3));
    }

    #[test]
    fn test_syslog_explicit_level() {
        let o = try_parse_from(["gidget", "-s", "7"]).unwrap();
        assert_eq!(o.syslog, Some(7));
    }

    #[test]
    fn test_syslog_level_out_of_range() {
        assert!(try_parse_from(["gidget", "-s", "8"]).is_err());
    }

    #[test]
    fn test_positional_config_fallback() {
        let o = try_parse_from(["gidget", "/etc/other.conf"]).unwrap();
        assert_eq!(o.config, PathBuf::from("/etc/other.conf"));
    }

    #[test]
    fn test_dash_c_wins_over_positional() {
        let o = try_parse_from(["gidget", "-c", "/a.conf", "/b.conf"]).unwrap();
        assert_eq!(o.config, PathBuf::from("/a.conf"));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(try_parse_from(["gidget", "-z"]).is_err());
    }
}
