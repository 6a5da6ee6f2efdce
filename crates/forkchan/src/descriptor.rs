//! Inherited descriptor slot shared by the launcher and the dispatcher.
//!
//! The launcher places the worker's socket at [`WORKER_CHANNEL_FD`] between fork and
//! exec; the dispatcher claims it from that slot at start-up. Both sides use this
//! module so the slot number cannot drift.
//!
//! ## Safety contracts
//!
//! 1. [`install_at_slot`] runs in the forked child before exec. It only calls
//!    `dup2`, which is async-signal-safe, and allocates nothing.
//! 2. [`claim_inherited`] is called at most once per process for a given slot, before
//!    anything else could have opened or taken ownership of that descriptor.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::unistd::dup2;

/// Slot the worker's end of the channel occupies: the first descriptor after
/// stdin, stdout and stderr.
pub const WORKER_CHANNEL_FD: RawFd = 3;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("no descriptor inherited at slot {fd}: {source}")]
    Missing {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
    #[error("descriptor at slot {fd} is not a unix socket: {source}")]
    NotASocket {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
}

/// Move `fd` out of the way of [`WORKER_CHANNEL_FD`] if it happens to sit there.
///
/// `dup2` onto the same number is a no-op that would leave close-on-exec set, so the
/// child-bound end must never already occupy the slot when the child is forked.
pub(crate) fn off_worker_slot(fd: OwnedFd) -> io::Result<OwnedFd> {
    if fd.as_raw_fd() != WORKER_CHANNEL_FD {
        return Ok(fd);
    }
    // try_clone uses F_DUPFD_CLOEXEC starting at 3; slot 3 is still taken by `fd`.
    let moved = fd.try_clone()?;
    drop(fd);
    tracing::trace!("Moved child endpoint off the worker slot");
    Ok(moved)
}

/// Duplicate `fd` onto [`WORKER_CHANNEL_FD`] without close-on-exec.
///
/// # Safety
///
/// Must only be called in a forked child between fork and exec (a `pre_exec` hook),
/// with `fd` open and different from [`WORKER_CHANNEL_FD`].
pub(crate) unsafe fn install_at_slot(fd: RawFd) -> io::Result<()> {
    // NOTE: no tracing here - the hook runs after fork and must not allocate or lock.
    let source = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut target = unsafe { OwnedFd::from_raw_fd(WORKER_CHANNEL_FD) };
    let result = dup2(source, &mut target);
    std::mem::forget(target); // exec hands the slot to the worker
    result.map_err(io::Error::from)
}

/// Take ownership of the socket inherited at `fd` and wrap it as a stream.
///
/// The descriptor is re-homed with close-on-exec so processes the worker spawns do
/// not inherit the channel, and the original slot is released.
///
/// # Safety
///
/// Nothing else in the process may own or use `fd`, now or later.
pub(crate) unsafe fn claim_inherited(fd: RawFd) -> Result<UnixStream, DescriptorError> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let rehomed = borrowed
        .try_clone_to_owned()
        .map_err(|source| DescriptorError::Missing { fd, source })?;

    // The clone succeeded, so `fd` is open and ours to close.
    drop(unsafe { OwnedFd::from_raw_fd(fd) });

    let stream = UnixStream::from(rehomed);
    if let Err(source) = stream.local_addr() {
        return Err(DescriptorError::NotASocket { fd, source });
    }

    tracing::trace!(
        inherited_fd = fd,
        channel_fd = stream.as_raw_fd(),
        "Claimed inherited channel descriptor"
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::IntoRawFd;

    #[test]
    fn claim_wraps_a_socket_and_keeps_it_connected() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let raw = theirs.into_raw_fd();

        let mut claimed = unsafe { claim_inherited(raw) }.unwrap();
        let mut ours = ours;
        ours.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        claimed.read_exact(&mut buf).unwrap();

        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn claim_rehomes_the_descriptor() {
        let (_ours, theirs) = UnixStream::pair().unwrap();
        let raw = theirs.into_raw_fd();

        let claimed = unsafe { claim_inherited(raw) }.unwrap();

        assert_ne!(claimed.as_raw_fd(), raw);
    }

    #[test]
    fn claim_rejects_non_socket() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let raw = file.into_raw_fd();

        let err = unsafe { claim_inherited(raw) }.unwrap_err();
        assert!(matches!(err, DescriptorError::NotASocket { fd, .. } if fd == raw));
    }

    #[test]
    fn descriptors_off_the_slot_are_untouched() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = OwnedFd::from(a);
        let raw = fd.as_raw_fd();

        if raw != WORKER_CHANNEL_FD {
            let kept = off_worker_slot(fd).unwrap();
            assert_eq!(kept.as_raw_fd(), raw);
        }
    }
}
