/*
 * config.rs
 *
 * The trick loader. One trick per line:
 *
 *   path:event-mask:script:account:mail-to
 *
 * '#' starts a comment. Blank lines and pure-comment lines are silently
 * skipped. A malformed line is reported and discarded, never fatal; an
 * unreadable file is fatal. Apostrophes are banned outright because
 * event-time path assembly single-quotes the object path.
 *
 * The loader also tracks the largest pathconf name length across all
 * accepted paths - that number sizes the event read buffer later.
 */

use std::io::BufRead;

use crate::limits;
use crate::logger::logx;
use crate::mask::EventMask;
use crate::opts::Opts;

/// Longest pathed script name a trick may carry.
pub const MAX_SCRIPT_LEN: usize = 256;
/// Longest mail recipient. Not checked for syntax or existence.
pub const MAX_MAIL_LEN: usize = 36;

/// One fully-registered trick: a watched path bound to an action.
///
/// `watch_id` is the kernel-issued watch descriptor and the table's
/// primary key; it is assigned at registration, never at parse time.
#[derive(Debug, Clone)]
pub struct Trick {
    pub watch_id: i32,
    pub mask: EventMask,
    pub path: String,
    pub script: String,
    pub account: String,
    pub mail_to: String,
}

/// A parsed-and-validated config line that has not been registered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub line_no: usize,
    pub path: String,
    pub mask: EventMask,
    pub script: String,
    pub account: String,
    pub mail_to: String,
}

impl Candidate {
    #[must_use]
    pub fn into_trick(self, watch_id: i32) -> Trick {
        Trick {
            watch_id,
            mask: self.mask,
            path: self.path,
            script: self.script,
            account: self.account,
            mail_to: self.mail_to,
        }
    }
}

#[derive(Debug)]
pub struct Loaded {
    pub candidates: Vec<Candidate>,
    /// Running maximum of pathconf name lengths seen during the load
    pub max_name_len: usize,
}

/* a byte the config file may carry outside of comments */
fn printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/* split the scanned region into raw tokens: ':' and end-of-line
 * terminate a field, '#' aborts the scan with the current field
 * unterminated */
struct Scan {
    fields: Vec<Vec<u8>>,
    diagnostics: Vec<String>,
    bad: bool,
}

fn scan_fields(raw: &[u8], line_no: usize, config_name: &str) -> Scan {
    let mut fields = Vec::new();
    let mut diagnostics = Vec::new();
    let mut bad = false;

    let mut start = 0usize;
    let mut hit_comment = false;
    let mut end = raw.len();

    for (i, &b) in raw.iter().enumerate() {
        if b == b'#' {
            hit_comment = true;
            end = i;
            break;
        }

        if b != b'\n' && !printable(b) {
            diagnostics.push(format!(
                "invisible character in file {config_name} line {line_no} position {}",
                i + 1
            ));
            bad = true;
        } else if b == b'\'' {
            diagnostics.push(format!(
                "illegal character in file {config_name} line {line_no} position {}",
                i + 1
            ));
            bad = true;
        }

        if b == b':' || b == b'\n' {
            fields.push(raw[start..i].to_vec());
            start = i + 1;
            if b == b'\n' {
                end = i;
                break;
            }
        }
    }

    /* a final line without a newline still gets its last field, unless a
     * comment cut the scan short */
    if !hit_comment && start < end {
        fields.push(raw[start..end].to_vec());
    }

    Scan {
        fields,
        diagnostics,
        bad,
    }
}

/// Parse one raw config line. Returns the accepted candidate (if any)
/// plus every diagnostic the line produced, in order. `max_name_len` is
/// the loader's running maximum and is updated even when a later field
/// kills the line, matching long-observed log output.
pub fn parse_line(
    raw: &[u8],
    line_no: usize,
    config_name: &str,
    max_name_len: &mut usize,
    verbose: bool,
) -> (Option<Candidate>, Vec<String>) {
    let mut scan = scan_fields(raw, line_no, config_name);
    let mut diagnostics = std::mem::take(&mut scan.diagnostics);
    let mut bad = scan.bad;

    if raw.len() > limits::line_max() {
        diagnostics.push(format!(
            "line exceeds system maximum line length in {config_name} line {line_no}"
        ));
        bad = true;
    }

    let login_max = limits::login_name_max();
    let mut candidate_mask = EventMask::empty();

    for (idx, tok) in scan.fields.iter().enumerate() {
        let field_no = idx + 1;
        let text = String::from_utf8_lossy(tok);

        match field_no {
            1 => match limits::name_max(&text) {
                Some(m) => {
                    if m > *max_name_len {
                        *max_name_len = m;
                        if verbose {
                            diagnostics
                                .push(format!("Maximum file name length set to {m}..."));
                        }
                    }
                }
                None => {
                    diagnostics.push(format!(
                        "Can't determine max file name length for filesystem hosting {text}"
                    ));
                    bad = true;
                }
            },
            2 => {
                if tok.is_empty() || !tok.iter().all(u8::is_ascii_digit) {
                    diagnostics.push(format!(
                        "ERROR: non-numeric event mask in {config_name} line {line_no} field 2"
                    ));
                    bad = true;
                } else {
                    match text.parse::<u32>() {
                        Ok(0) => {
                            diagnostics.push(format!(
                                "ERROR: zero event mask in {config_name} line {line_no} field 2"
                            ));
                            bad = true;
                        }
                        Ok(bits) => candidate_mask = EventMask::from_raw(bits),
                        Err(_) => {
                            diagnostics.push(format!(
                                "ERROR: event mask out of range in {config_name} line {line_no} field 2"
                            ));
                            bad = true;
                        }
                    }
                }
            }
            3 => {
                if tok.len() > MAX_SCRIPT_LEN {
                    diagnostics.push(format!(
                        "ERROR: script name too long in {config_name} line {line_no} field 3"
                    ));
                    bad = true;
                }
            }
            4 => {
                if tok.len() > login_max {
                    diagnostics.push(format!(
                        "ERROR: user name too long in {config_name} line {line_no} field 4"
                    ));
                    bad = true;
                }
            }
            5 => {
                if tok.len() > MAX_MAIL_LEN {
                    diagnostics.push(format!(
                        "Email address too long in {config_name} line {line_no} field 5"
                    ));
                    bad = true;
                }
            }
            _ => {
                /* extra fields are complained about but do not kill the
                 * line; the first five have already been captured */
                diagnostics.push(format!(
                    "TOO MANY FIELDS IN LINE {line_no} - DISCARDING {text}!"
                ));
            }
        }
    }

    /* blank lines and full-line comments produce no fields at all */
    if scan.fields.is_empty() {
        return (None, diagnostics);
    }

    if bad || scan.fields.len() < 5 {
        diagnostics.push(format!("ERROR: discarding {config_name} line {line_no}!"));
        return (None, diagnostics);
    }

    let field = |i: usize| String::from_utf8_lossy(&scan.fields[i]).into_owned();
    let candidate = Candidate {
        line_no,
        path: field(0),
        mask: candidate_mask,
        script: field(2),
        account: field(3),
        mail_to: field(4),
    };
    (Some(candidate), diagnostics)
}

/// Load every trick candidate from the configuration stream, logging
/// per-line diagnostics as they occur. A stream read error is fatal.
pub fn load<R: BufRead>(mut reader: R, opts: &Opts) -> Loaded {
    let config_name = opts.config.display().to_string();
    let mut candidates = Vec::new();
    let mut max_name_len = 0usize;
    let mut line_no = 0usize;
    let mut raw = Vec::new();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                line_no += 1;
                let (candidate, diagnostics) =
                    parse_line(&raw, line_no, &config_name, &mut max_name_len, opts.verbose);
                for d in &diagnostics {
                    logx(0, opts, d);
                }
                if let Some(c) = candidate {
                    candidates.push(c);
                }
            }
            Err(e) => {
                let err = crate::error::GidgetError::ConfigRead(config_name.clone(), e);
                logx(err.exit_code(), opts, &err.to_string());
                unreachable!("logx with non-zero status exits");
            }
        }
    }

    Loaded {
        candidates,
        max_name_len,
    }
}
