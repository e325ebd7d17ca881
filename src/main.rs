/*
 * main.rs
 *
 * Startup choreography, in the order that keeps failure cheap: parse
 * flags, open the config (before daemonizing, so relative paths work
 * and a missing config never creates pid or log files), redirect logs,
 * daemonize, register watches, trap signals, hand off to the read loop.
 */

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::process;

use gidget::config;
use gidget::error::{exit_codes, GidgetError};
use gidget::logger::{self, logx};
use gidget::opts::Opts;
use gidget::watch::{WatchInstance, WatchTable};
use gidget::{daemonize, engine, limits, signals};

fn main() {
    daemonize::set_umask();
    let opts = gidget::opts::parse();

    if opts.syslog.is_some() {
        logger::open_syslog();
    }

    let config_file = match File::open(&opts.config) {
        Ok(f) => f,
        Err(e) => {
            let err = GidgetError::ConfigOpen(opts.config.display().to_string(), e);
            logx(err.exit_code(), &opts, &err.to_string());
            unreachable!("logx with non-zero status exits");
        }
    };

    if opts.log_to_file {
        logger::reopen_logs(&opts);
    }
    if opts.daemon {
        daemonize::daemonize(&opts);
    }

    /* workers stamp this into their log lines so concurrent gidgets can
     * be told apart */
    let daemon_pid = process::id();

    logx(0, &opts, "daemon initialization");

    let instance = match WatchInstance::init() {
        Ok(i) => i,
        Err(e) => {
            logx(e.exit_code(), &opts, &e.to_string());
            unreachable!("logx with non-zero status exits");
        }
    };

    let config::Loaded {
        candidates,
        max_name_len,
    } = config::load(BufReader::new(config_file), &opts);
    let table = register_watches(&instance, candidates, &opts);

    if opts.verbose {
        dump_tables(&table, max_name_len);
    }

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    if let Err(sig) = signals::install() {
        logx(
            exit_codes::SIGNAL_SETUP,
            &opts,
            &format!("could not set trap for {sig}"),
        );
    }

    engine::run(instance, table, &opts, max_name_len, daemon_pid);
}

/* one kernel watch per accepted config line; a refused watch discards
 * that trick and nothing else, but a descriptor arriving out of
 * sequence means lookups can no longer be trusted and is fatal */
fn register_watches(
    instance: &WatchInstance,
    candidates: Vec<config::Candidate>,
    opts: &Opts,
) -> WatchTable {
    let mut table = WatchTable::new();

    for candidate in candidates {
        let line_no = candidate.line_no;
        match instance.add_watch(&candidate.path, candidate.mask) {
            Err(e) => {
                logx(0, opts, &e.to_string());
                logx(
                    0,
                    opts,
                    &format!("ERROR: discarding {} line {line_no}!", opts.config.display()),
                );
            }
            Ok(wd) => {
                let trick = candidate.into_trick(wd);
                let added = format!(
                    "Added watch {} mask {:#010x} handle {}.",
                    trick.path,
                    trick.mask.bits(),
                    trick.watch_id
                );
                if let Err(e) = table.insert(trick) {
                    logx(e.exit_code(), opts, &e.to_string());
                }
                if opts.verbose {
                    logx(0, opts, &added);
                }
            }
        }
    }

    table
}

/* debuggery: dump the loaded tables in toto */
fn dump_tables(table: &WatchTable, max_name_len: usize) {
    println!();
    println!("Max userid length is {}", limits::login_name_max());
    println!("Max input line length is {}", limits::line_max());
    println!("Max file name length returnable by a watch is {max_name_len}");

    for trick in table.iter() {
        println!();
        println!("thing to watch: {}", trick.path);
        println!("decimal event mask bitmap: {}", trick.mask.bits());
        println!("hex event mask bitmap: {:#010x}", trick.mask.bits());
        println!("script to execute: {}", trick.script);
        println!("userid for script execution: {}", trick.account);
        println!("email to receive output: {}", trick.mail_to);
        println!("watch descriptor assigned to trick: {}", trick.watch_id);
    }
}
