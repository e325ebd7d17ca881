/*
 * mailer.rs
 *
 * Capture what the grandchild wrote and mail it; stay silent when it
 * wrote nothing. Then reap the grandchild and surface its exit status -
 * the worker process exits with the same status the script did.
 *
 * The transport is a sendmail-compatible program fed RFC-5322 text on
 * stdin. Going through a local transport rather than SMTP keeps us out
 * of the delivery business and gives aliases/LDAP for free. The command
 * is fixed at compile time; change the constants below for a different
 * transport, never an environment variable.
 *
 * The single-byte probe read is the silence test: EOF before the first
 * byte means the script produced no output and no mail process is ever
 * started. The probe byte is re-emitted into the body and excluded from
 * the logged byte count, which keeps the count identical to what
 * operators have always seen.
 */

use std::ffi::OsStr;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::process::{Child, Command, Stdio};

use chrono::Local;

use crate::error::GidgetError;
use crate::logger::logx;
use crate::opts::Opts;

/// Local mail transport, sendmail-compatible. Compile-time constant.
pub const MAIL_TRANSPORT: &str = "/usr/lib/sendmail";

/* -Fx   = set full-name of sender
 * -odi  = deliver interactively (synchronous errors)
 * -oem  = mail errors back to sender
 * -oi   = a lone "." does not end input
 * -t    = take recipients from the headers */
pub const MAIL_OPTIONS: [&str; 5] = ["-Fgidget", "-odi", "-oem", "-oi", "-t"];

/// Everything the message headers and body preamble need.
pub struct MessageMeta<'a> {
    pub account: &'a str,
    pub mail_to: &'a str,
    /// Assembled object path, raw bytes (event names are not UTF-8 clean)
    pub object: &'a [u8],
    pub watch_id: i32,
    pub mask_bits: u32,
    pub shell: &'a OsStr,
    pub command: &'a [u8],
}

/// The transport invocation, ready to spawn with piped stdin.
#[must_use]
pub fn transport_command() -> Command {
    let mut cmd = Command::new(MAIL_TRANSPORT);
    cmd.args(MAIL_OPTIONS);
    cmd
}

/* traditional ctime format: maximally boring, maximally SMTP friendly */
fn mail_date() -> String {
    Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

fn compose_message_head(meta: &MessageMeta<'_>, date: &str) -> Vec<u8> {
    let mut head = Vec::with_capacity(256 + meta.object.len() * 2 + meta.command.len());
    head.extend_from_slice(format!("From: {} (gidget)\n", meta.account).as_bytes());
    head.extend_from_slice(format!("To: {}\n", meta.mail_to).as_bytes());
    head.extend_from_slice(b"Subject: gidget event: ");
    head.extend_from_slice(meta.object);
    head.push(b'\n');
    head.extend_from_slice(format!("Date: {date}\n").as_bytes());
    /* auto-generated per RFC 3834 section 5.1, so autoresponders shut up */
    head.extend_from_slice(b"Auto-Submitted: auto-generated\n");
    head.extend_from_slice(b"X-gidget-object: ");
    head.extend_from_slice(meta.object);
    head.push(b'\n');
    head.extend_from_slice(format!("X-gidget-watch: {}\n", meta.watch_id).as_bytes());
    head.extend_from_slice(format!("X-gidget-mask: {}\n", meta.mask_bits).as_bytes());
    /* the blank line separating headers from body is mandatory */
    head.push(b'\n');
    head.extend_from_slice(meta.shell.as_bytes());
    head.extend_from_slice(b" -c ");
    head.extend_from_slice(meta.command);
    head.extend_from_slice(b":\n\n");
    head
}

/// Probe the capture pipe; mail headers plus everything the script wrote
/// through `transport` if there was anything at all.
///
/// Returns `Ok(None)` when the script produced no output (no transport
/// process is spawned), otherwise `Ok(Some(n))` where `n` counts the
/// mailed output bytes excluding the probe byte.
pub fn capture_and_mail<R: Read>(
    pipe: &mut R,
    meta: &MessageMeta<'_>,
    mut transport: Command,
) -> io::Result<Option<u64>> {
    let mut probe = [0u8; 1];
    let first = loop {
        match pipe.read(&mut probe) {
            Ok(0) => return Ok(None),
            Ok(_) => break probe[0],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    };

    let mut child = transport.stdin(Stdio::piped()).spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(ErrorKind::Other, "transport stdin not piped"))?;

    let head = compose_message_head(meta, &mail_date());
    stdin.write_all(&head)?;
    stdin.write_all(&[first])?;
    let mailed = io::copy(pipe, &mut stdin)?;
    stdin.flush()?;
    drop(stdin);

    /* pclose semantics: wait for the transport before moving on */
    let _ = child.wait();
    Ok(Some(mailed))
}

/// Wait for the grandchild, log its outcome, and exit the worker with
/// the same status. Never returns.
pub fn reap_and_exit(mut grandchild: Child, script: &str, command: &str, opts: &Opts) -> ! {
    let status = match grandchild.wait() {
        Ok(s) => s,
        Err(_) => {
            let err = GidgetError::StatusUnknown(script.into());
            logx(err.exit_code(), opts, &err.to_string());
            unreachable!("logx with non-zero status exits");
        }
    };

    /* low-order eight bits only; a signal death has no code at all */
    let code = match status.code() {
        Some(c) => c & 0xFF,
        None => {
            let err = GidgetError::StatusUnknown(script.into());
            logx(err.exit_code(), opts, &err.to_string());
            unreachable!("logx with non-zero status exits");
        }
    };

    let summary = match code {
        /* 127 conventionally means the shell never found the command */
        127 => {
            logx(0, opts, &format!("Script {script} returned ambiguous result"));
            "scripts to be executed by gidget should never be written to return status 127"
                .to_string()
        }
        0 => {
            if opts.verbose {
                format!("child process successfully executed {command}")
            } else {
                "script executor grandchild process successful completion".to_string()
            }
        }
        n => format!("script fail, {command} returned status {n}"),
    };

    logx(code, opts, &summary);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::FromRawFd;

    fn meta<'a>(object: &'a [u8], command: &'a [u8]) -> MessageMeta<'a> {
        MessageMeta {
            account: "nobody",
            mail_to: "ops@example.test",
            object,
            watch_id: 1,
            mask_bits: 256,
            shell: OsStr::new("/bin/sh"),
            command,
        }
    }

    /* a unix pipe with the given bytes already written and the write
     * end closed, so reads drain the content then hit EOF */
    fn loaded_pipe(content: &[u8]) -> File {
        let mut fds = [0i32; 2];
        // SAFETY: fds is a valid 2-element array
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // SAFETY: fds[1] is the freshly created write end
        let mut w = unsafe { File::from_raw_fd(fds[1]) };
        w.write_all(content).unwrap();
        drop(w);
        // SAFETY: fds[0] is the freshly created read end
        unsafe { File::from_raw_fd(fds[0]) }
    }

    #[test]
    fn test_no_output_means_no_transport_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invoked");

        let mut stub = Command::new("/bin/sh");
        stub.arg("-c").arg(format!("touch {}", marker.display()));

        let mut pipe = loaded_pipe(b"");
        let mailed = capture_and_mail(&mut pipe, &meta(b"/tmp/x", b"/bin/true '/tmp/x' 0x00000100"), stub)
            .unwrap();

        assert_eq!(mailed, None);
        assert!(!marker.exists(), "transport must not run for silent scripts");
    }

    #[test]
    fn test_output_is_mailed_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("message");

        let mut stub = Command::new("/bin/sh");
        stub.arg("-c").arg(format!("cat > {}", out.display()));

        let mut pipe = loaded_pipe(b"hello\n");
        let mailed = capture_and_mail(
            &mut pipe,
            &meta(b"/tmp/inbox/a.txt", b"/bin/echo hello '/tmp/inbox/a.txt' 0x00000100"),
            stub,
        )
        .unwrap();

        /* five of the six bytes count; the probe byte does not */
        assert_eq!(mailed, Some(5));

        let message = std::fs::read_to_string(&out).unwrap();
        assert!(message.contains("From: nobody (gidget)\n"));
        assert!(message.contains("To: ops@example.test\n"));
        assert!(message.contains("Subject: gidget event: /tmp/inbox/a.txt\n"));
        assert!(message.contains("Auto-Submitted: auto-generated\n"));
        assert!(message.contains("X-gidget-object: /tmp/inbox/a.txt\n"));
        assert!(message.contains("X-gidget-watch: 1\n"));
        assert!(message.contains("X-gidget-mask: 256\n"));
        assert!(message.contains("/bin/sh -c /bin/echo hello '/tmp/inbox/a.txt' 0x00000100:\n\n"));
        assert!(message.ends_with("hello\n"), "body carries the output verbatim");
    }

    #[test]
    fn test_headers_and_body_separated_by_blank_line() {
        let head = compose_message_head(
            &meta(b"/tmp/x", b"/bin/true '/tmp/x' 0x00000100"),
            "Thu Feb 15 09:00:00 2011",
        );
        let text = String::from_utf8(head).unwrap();
        assert!(text.contains("X-gidget-mask: 256\n\n/bin/sh -c "));
        assert!(text.ends_with(":\n\n"));
    }

    #[test]
    fn test_munged_object_appears_in_subject() {
        let head = compose_message_head(
            &meta(b"/tmp/inbox/it%27s.txt", b"x"),
            "Thu Feb 15 09:00:00 2011",
        );
        let text = String::from_utf8(head).unwrap();
        assert!(text.contains("Subject: gidget event: /tmp/inbox/it%27s.txt\n"));
    }
}
