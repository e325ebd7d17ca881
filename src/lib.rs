/*
 * lib.rs
 *
 * Exists mostly for testing. Integration tests need the internals, doc
 * tests need a lib. The program lives in main.rs.
 */

//! # gidget
//!
//! Filesystem event triggered script executor.
//!
//! gidget watches a configured set of paths for inotify events and, for
//! each notification, forks a worker that runs a user-supplied script as
//! a configured account and mails any output to a configured recipient.
//!
//! One *trick* per configuration line:
//!
//! ```text
//! /home/gidget/xmas-list.txt:24:/usr/bin/call_santa.sh:nobody:gidget@example.com
//! ```
//!
//! Choose the minimum event mask that works. The kernel event queue is
//! finite and overflow discards notifications without appeal.

pub mod config;
pub mod daemonize;
pub mod engine;
pub mod error;
pub mod event;
pub mod limits;
pub mod logger;
pub mod mailer;
pub mod mask;
pub mod opts;
pub mod signals;
pub mod watch;
pub mod worker;

pub use config::Trick;
pub use error::{GidgetError, Result};
pub use event::Event;
pub use mask::EventMask;
pub use opts::Opts;
pub use watch::{WatchInstance, WatchTable};
