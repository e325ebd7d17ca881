/*
 * event.rs
 *
 * Decode raw inotify records out of the read buffer.
 *
 * Wire layout per record: a fixed inotify_event header (wd, mask,
 * cookie, len) followed by `len` bytes of name. The name is
 * NUL-terminated and NUL-padded out to the declared length so the
 * kernel can align the next record; the declared length is about
 * padding, not content, so the decoder cuts at the first NUL and never
 * trusts `len` beyond the buffer's actual end.
 */

use std::mem;
use std::ptr;

use crate::mask::EventMask;

/// One decoded kernel notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Which trick fired; -1 on queue-overflow pseudo-events
    pub wd: i32,
    pub mask: EventMask,
    /// Pairs the two halves of a rename
    pub cookie: u32,
    /// Entry name within a watched directory; empty when the watched
    /// path itself is the subject
    pub name: Vec<u8>,
}

pub const HEADER_LEN: usize = mem::size_of::<libc::inotify_event>();

/// Decode the first event record in `buf`. Returns `None` when the
/// buffer cannot hold even a header.
///
/// Only the first record is decoded: the read buffer is sized for one
/// maximal record, and each event gets its own worker process anyway.
#[must_use]
pub fn decode_first(buf: &[u8]) -> Option<Event> {
    if buf.len() < HEADER_LEN {
        return None;
    }

    // SAFETY: buf holds at least HEADER_LEN bytes and inotify_event is
    // plain old data; read_unaligned copes with the byte buffer having
    // no particular alignment
    let header: libc::inotify_event =
        unsafe { ptr::read_unaligned(buf.as_ptr().cast::<libc::inotify_event>()) };

    let declared = header.len as usize;
    let avail = buf.len() - HEADER_LEN;
    let raw_name = &buf[HEADER_LEN..HEADER_LEN + declared.min(avail)];

    /* stop at the first NUL; everything after is alignment padding */
    let name = raw_name
        .split(|&b| b == 0)
        .next()
        .unwrap_or(&[])
        .to_vec();

    Some(Event {
        wd: header.wd,
        mask: EventMask::from_raw(header.mask),
        cookie: header.cookie,
        name,
    })
}
