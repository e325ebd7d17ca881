/*
 * mask.rs
 *
 * The 32-bit inotify event bitmap, typed. Config masks and decoded event
 * masks are both this type. Kernel-supplied masks may carry bits newer
 * than this build knows about, so decoding must never drop bits -
 * from_raw keeps them and describe() warns about them.
 */

use bitflags::bitflags;

bitflags! {
    /// Event classes a trick can trigger on, plus the kernel-only status
    /// bits delivered in decoded events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const ACCESS        = libc::IN_ACCESS;
        const MODIFY        = libc::IN_MODIFY;
        const ATTRIB        = libc::IN_ATTRIB;
        const CLOSE_WRITE   = libc::IN_CLOSE_WRITE;
        const CLOSE_NOWRITE = libc::IN_CLOSE_NOWRITE;
        const OPEN          = libc::IN_OPEN;
        const MOVED_FROM    = libc::IN_MOVED_FROM;
        const MOVED_TO      = libc::IN_MOVED_TO;
        const CREATE        = libc::IN_CREATE;
        const DELETE        = libc::IN_DELETE;
        const DELETE_SELF   = libc::IN_DELETE_SELF;
        const MOVE_SELF     = libc::IN_MOVE_SELF;
        const UNMOUNT       = libc::IN_UNMOUNT;
        const Q_OVERFLOW    = libc::IN_Q_OVERFLOW;
        const IGNORED       = libc::IN_IGNORED;
        const ONLYDIR       = libc::IN_ONLYDIR;
        const DONT_FOLLOW   = libc::IN_DONT_FOLLOW;
        const MASK_ADD      = libc::IN_MASK_ADD;
        const ISDIR         = libc::IN_ISDIR;
        const ONESHOT       = libc::IN_ONESHOT;

        /* synthetic unions, same values the kernel headers define */
        const CLOSE      = libc::IN_CLOSE;
        const MOVE       = libc::IN_MOVE;
        const ALL_EVENTS = libc::IN_ALL_EVENTS;
    }
}

impl EventMask {
    /// Wrap a kernel- or config-supplied bitmap without losing unknown bits.
    #[must_use]
    pub fn from_raw(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }
}

/* one name per single-bit position, LSB first; gaps are unassigned bits */
const BIT_NAMES: [Option<&str>; 32] = {
    let mut names: [Option<&str>; 32] = [None; 32];
    names[0] = Some("IN_ACCESS");
    names[1] = Some("IN_MODIFY");
    names[2] = Some("IN_ATTRIB");
    names[3] = Some("IN_CLOSE_WRITE");
    names[4] = Some("IN_CLOSE_NOWRITE");
    names[5] = Some("IN_OPEN");
    names[6] = Some("IN_MOVED_FROM");
    names[7] = Some("IN_MOVED_TO");
    names[8] = Some("IN_CREATE");
    names[9] = Some("IN_DELETE");
    names[10] = Some("IN_DELETE_SELF");
    names[11] = Some("IN_MOVE_SELF");
    names[13] = Some("IN_UNMOUNT");
    names[14] = Some("IN_Q_OVERFLOW");
    names[15] = Some("IN_IGNORED");
    names[24] = Some("IN_ONLYDIR");
    names[25] = Some("IN_DONT_FOLLOW");
    names[29] = Some("IN_MASK_ADD");
    names[30] = Some("IN_ISDIR");
    names[31] = Some("IN_ONESHOT");
    names
};

/* bits the kernel can legitimately set that ALL_EVENTS does not cover */
const STATUS_BITS: u32 =
    libc::IN_ISDIR | libc::IN_UNMOUNT | libc::IN_Q_OVERFLOW | libc::IN_IGNORED;

/// Render a mask as human-readable `IN_*(0xXXXXXXXX)` words for the
/// verbose event dump, including the synthetic close/move unions and a
/// warning for bits this build cannot name.
#[must_use]
pub fn describe(mask: EventMask) -> String {
    let bits = mask.bits();
    let mut out = String::new();
    let mut hits = 0usize;

    for (i, name) in BIT_NAMES.iter().enumerate() {
        let bit = 1u32 << i;
        if bits & bit != 0 {
            if let Some(name) = name {
                if hits != 0 {
                    out.push(' ');
                }
                out.push_str(&format!("{name}({bit:#010x})"));
                hits += 1;
            }
        }
    }

    /* the unions read better than their halves when either half is set */
    if bits & libc::IN_CLOSE != 0 {
        if hits != 0 {
            out.push(' ');
        }
        out.push_str(&format!("IN_CLOSE({:#010x})", libc::IN_CLOSE));
        hits += 1;
    }
    if bits & libc::IN_MOVE != 0 {
        if hits != 0 {
            out.push(' ');
        }
        out.push_str(&format!("IN_MOVE({:#010x})", libc::IN_MOVE));
        hits += 1;
    }

    let unknown = bits & !(libc::IN_ALL_EVENTS | STATUS_BITS | 0xFF00_0000);
    if unknown != 0 {
        if hits != 0 {
            out.push(' ');
        }
        out.push_str(&format!(
            "WARNING! Unrecognized event flag {unknown:#010x} not mapped by IN_ALL_EVENTS!"
        ));
        hits += 1;
    }

    if hits == 0 {
        out.push_str(&format!(
            "WARNING! No string representation of event mask {bits:#010x} is available!"
        ));
    }

    out
}
