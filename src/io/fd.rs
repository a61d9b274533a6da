//! Interruptible blocking I/O over borrowed raw descriptors
//!
//! Every blocking call polls the data descriptor together with the stop
//! signal's event descriptor, so a stop request wakes a parked worker
//! immediately. EINTR is retried silently; orderly peer closure is folded
//! into a `Closed` outcome so the loops can exit without a diagnostic.

use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd;

use crate::transport::StopSignal;

#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Data(usize),
    Closed,
    Cancelled,
}

#[derive(Debug)]
pub(crate) enum ExactOutcome {
    Filled,
    Closed,
    Cancelled,
}

#[derive(Debug)]
pub(crate) enum WriteOutcome {
    Done,
    Closed,
    Cancelled,
}

fn borrowed(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: transport descriptors are owned by the control plane, which
    // keeps them open from before the worker starts until after it joins.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

fn is_disconnect(err: Errno) -> bool {
    matches!(
        err,
        Errno::ECONNRESET | Errno::ENOTCONN | Errno::EPIPE | Errno::ESHUTDOWN
    )
}

/// One blocking read of up to `buf.len()` bytes.
pub(crate) fn read_interruptible(
    fd: RawFd,
    stop: &StopSignal,
    buf: &mut [u8],
) -> std::io::Result<ReadOutcome> {
    loop {
        if stop.is_stopped() {
            return Ok(ReadOutcome::Cancelled);
        }
        let mut fds = [
            PollFd::new(borrowed(fd), PollFlags::POLLIN),
            PollFd::new(stop.event_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        if stop.is_stopped() {
            return Ok(ReadOutcome::Cancelled);
        }
        match unistd::read(fd, buf) {
            Ok(0) => return Ok(ReadOutcome::Closed),
            Ok(n) => return Ok(ReadOutcome::Data(n)),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) if is_disconnect(e) => return Ok(ReadOutcome::Closed),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Blocking read of exactly `buf.len()` bytes. A peer closure mid-buffer
/// discards the partial tail and reports `Closed`.
pub(crate) fn read_exact_interruptible(
    fd: RawFd,
    stop: &StopSignal,
    buf: &mut [u8],
) -> std::io::Result<ExactOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_interruptible(fd, stop, &mut buf[filled..])? {
            ReadOutcome::Data(n) => filled += n,
            ReadOutcome::Closed => return Ok(ExactOutcome::Closed),
            ReadOutcome::Cancelled => return Ok(ExactOutcome::Cancelled),
        }
    }
    Ok(ExactOutcome::Filled)
}

/// Blocking write of the whole buffer, retrying partial writes.
pub(crate) fn write_all_interruptible(
    fd: RawFd,
    stop: &StopSignal,
    data: &[u8],
) -> std::io::Result<WriteOutcome> {
    let mut written = 0;
    while written < data.len() {
        if stop.is_stopped() {
            return Ok(WriteOutcome::Cancelled);
        }
        let mut fds = [
            PollFd::new(borrowed(fd), PollFlags::POLLOUT),
            PollFd::new(stop.event_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        if stop.is_stopped() {
            return Ok(WriteOutcome::Cancelled);
        }
        match unistd::write(borrowed(fd), &data[written..]) {
            Ok(n) => written += n,
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) if is_disconnect(e) => return Ok(WriteOutcome::Closed),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(WriteOutcome::Done)
}

/// Full write without a stop signal, for one-shot producers.
pub(crate) fn write_all(fd: RawFd, data: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    while written < data.len() {
        match unistd::write(borrowed(fd), &data[written..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "descriptor accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
