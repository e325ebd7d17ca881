/*
 * watch.rs
 *
 * The kernel side of trick registration. One inotify instance per
 * daemon; one watch per trick; the kernel-issued watch descriptor
 * becomes the trick's primary key.
 *
 * The table is position-indexed: the kernel issues descriptors 1, 2, 3…
 * in registration order, so trick lookup is table[wd - 1]. If a
 * descriptor ever arrives out of sequence that assumption is dead and
 * so is safe dispatch, so insert() refuses and the daemon dies loudly
 * rather than run the wrong trick as the wrong account.
 */

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use crate::config::Trick;
use crate::error::{GidgetError, Result};
use crate::mask::EventMask;

/// Owner of the inotify file descriptor. Only the daemon holds watches;
/// forked workers close their inherited copy immediately.
#[derive(Debug)]
pub struct WatchInstance {
    fd: RawFd,
}

impl WatchInstance {
    /// Create the kernel watch instance.
    pub fn init() -> Result<Self> {
        // SAFETY: inotify_init takes no arguments; a negative return is an error
        let fd = unsafe { libc::inotify_init() };
        if fd < 0 {
            return Err(GidgetError::InotifyInit(io::Error::last_os_error()));
        }
        Ok(WatchInstance { fd })
    }

    /// Register one watch; returns the kernel-issued watch descriptor.
    pub fn add_watch(&self, path: &str, mask: EventMask) -> Result<i32> {
        let c_path = CString::new(path)
            .map_err(|_| GidgetError::WatchAdd(path.into(), io::Error::from_raw_os_error(libc::EINVAL)))?;
        // SAFETY: fd is a live inotify descriptor and c_path is NUL-terminated
        let wd = unsafe { libc::inotify_add_watch(self.fd, c_path.as_ptr(), mask.bits()) };
        if wd < 0 {
            return Err(GidgetError::WatchAdd(path.into(), io::Error::last_os_error()));
        }
        Ok(wd)
    }

    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Blocking read of raw event records into `buf`.
    ///
    /// A signal-interrupted read surfaces as `ErrorKind::Interrupted`;
    /// the event loop owns that case.
    pub fn read_events(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is a live, writable slice; read never writes past its length
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

impl Drop for WatchInstance {
    fn drop(&mut self) {
        // SAFETY: fd was returned by inotify_init and is closed exactly once
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// The descriptor-indexed trick table. Read-only after load; workers see
/// a snapshot by fork.
#[derive(Debug, Default)]
pub struct WatchTable {
    tricks: Vec<Trick>,
}

impl WatchTable {
    #[must_use]
    pub fn new() -> Self {
        WatchTable { tricks: Vec::new() }
    }

    /// Append a registered trick, enforcing the sequential-descriptor
    /// contract that makes `lookup` a plain index.
    pub fn insert(&mut self, trick: Trick) -> Result<()> {
        let expected = self.tricks.len() as i32 + 1;
        if trick.watch_id != expected {
            return Err(GidgetError::NonSequentialWatch {
                expected,
                got: trick.watch_id,
            });
        }
        self.tricks.push(trick);
        Ok(())
    }

    /// Find the trick a decoded event belongs to. An invalidated watch
    /// (IN_IGNORED already seen) still resolves here so diagnostics can
    /// name the path.
    #[must_use]
    pub fn lookup(&self, wd: i32) -> Option<&Trick> {
        if wd < 1 {
            return None;
        }
        self.tricks.get(wd as usize - 1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tricks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tricks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trick> {
        self.tricks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::EventMask;

    fn trick(wd: i32) -> Trick {
        Trick {
            watch_id: wd,
            mask: EventMask::from_raw(libc::IN_CREATE),
            path: format!("/watched/{wd}"),
            script: "/bin/true".into(),
            account: "nobody".into(),
            mail_to: "ops@example.test".into(),
        }
    }

    #[test]
    fn test_sequential_inserts_index_by_descriptor() {
        let mut table = WatchTable::new();
        for wd in 1..=5 {
            table.insert(trick(wd)).unwrap();
        }
        assert_eq!(table.len(), 5);
        for wd in 1..=5 {
            assert_eq!(table.lookup(wd).unwrap().watch_id, wd);
        }
    }

    #[test]
    fn test_non_sequential_descriptor_is_heap_corrupt() {
        /* a stubbed kernel handing back descriptor 7 after 1 must be
         * treated as fatal table corruption */
        let mut table = WatchTable::new();
        table.insert(trick(1)).unwrap();
        let err = table.insert(trick(7)).unwrap_err();
        assert!(err.to_string().contains("Heap corrupt"));
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_lookup_out_of_range() {
        let mut table = WatchTable::new();
        table.insert(trick(1)).unwrap();
        assert!(table.lookup(0).is_none());
        assert!(table.lookup(-1).is_none());
        assert!(table.lookup(2).is_none());
    }

    #[test]
    fn test_instance_init_and_watch_root() {
        /* talks to the real kernel; inotify is available on any Linux CI */
        let instance = WatchInstance::init().unwrap();
        let wd = instance
            .add_watch("/", EventMask::from_raw(libc::IN_CREATE))
            .unwrap();
        assert_eq!(wd, 1, "first watch descriptor is 1");
    }

    #[test]
    fn test_add_watch_missing_path_fails() {
        let instance = WatchInstance::init().unwrap();
        let err = instance
            .add_watch("/no/such/path_zz", EventMask::from_raw(libc::IN_CREATE))
            .unwrap_err();
        assert!(err.to_string().contains("Unable to add watch"));
    }
}
