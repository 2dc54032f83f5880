//! Per-operation syscall handlers (§4.G): one non-blocking attempt per op
//! kind, mapping the raw result into something the loop can act on.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use crate::completion::{Completion, Direction, Op, OpKind, RawResult};
use crate::error::ErrorKind;

/// What happened when the loop tried an operation's syscall once.
pub(crate) enum Attempt {
    /// The op finished, one way or another; `result` is ready to hand to
    /// the completion's callback.
    Done(RawResult),
    /// `EAGAIN`/`EWOULDBLOCK`: register interest in `direction` and park
    /// the completion in the notifier's waiting set.
    WouldBlock(Direction),
    /// `EINTR`: re-append to the tail of `unqueued`, try again next
    /// iteration. Never surfaced to a callback.
    Interrupted,
}

/// Attempts the syscall named by `c`'s op exactly once.
///
/// # Safety
/// `c` must point to a live `Completion` not concurrently accessed.
pub(crate) unsafe fn attempt(c: NonNull<Completion>) -> Attempt {
    let op_ptr = c.as_ref().op.get();
    match &mut *op_ptr {
        Op::Accept { fd } => attempt_accept(*fd),
        Op::Connect {
            fd,
            addr,
            in_progress,
        } => attempt_connect(*fd, *addr, in_progress),
        Op::Recv { fd, buf, len } => attempt_recv(*fd, buf.as_ptr(), *len),
        Op::Send { fd, buf, len } => attempt_send(*fd, buf.as_ptr(), *len),
        Op::Read { fd, buf, len, offset } => attempt_read(*fd, buf.as_ptr(), *len, *offset),
        Op::Write { fd, buf, len, offset } => attempt_write(*fd, buf.as_ptr(), *len, *offset),
        Op::Close { fd } => attempt_close(*fd),
        Op::Timeout { .. } => unreachable!("timeouts are scheduled, never attempted"),
    }
}

/// The kernel interest direction a given op kind waits on, or `None` for
/// ops that never block on readiness (`close`, `timeout`).
pub(crate) fn direction_for(kind: OpKind) -> Option<Direction> {
    match kind {
        OpKind::Accept | OpKind::Recv | OpKind::Read => Some(Direction::Readable),
        OpKind::Connect | OpKind::Send | OpKind::Write => Some(Direction::Writable),
        OpKind::Close | OpKind::Timeout => None,
    }
}

fn attempt_accept(fd: RawFd) -> Attempt {
    let res = unsafe { libc::accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC) };
    if res != -1 {
        return Attempt::Done(RawResult::Accept(Ok(res)));
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::EAGAIN | libc::EWOULDBLOCK => Attempt::WouldBlock(Direction::Readable),
        libc::EINTR => Attempt::Interrupted,
        other => Attempt::Done(RawResult::Accept(Err(ErrorKind::from_errno(other)))),
    }
}

fn attempt_connect(fd: RawFd, addr: SocketAddr, in_progress: &mut bool) -> Attempt {
    if *in_progress {
        // The first attempt already kicked off the connect; a writable
        // event means it's time to read back SO_ERROR.
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if res == -1 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Attempt::Done(RawResult::Unit(Err(ErrorKind::from_errno(errno))));
        }
        return if err == 0 {
            Attempt::Done(RawResult::Unit(Ok(())))
        } else {
            Attempt::Done(RawResult::Unit(Err(ErrorKind::from_errno(err))))
        };
    }

    let (raw_addr, len) = crate::socket::socket_addr_to_raw(addr);
    let res = unsafe { libc::connect(fd, raw_addr.as_ptr() as *const libc::sockaddr, len) };
    if res != -1 {
        return Attempt::Done(RawResult::Unit(Ok(())));
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::EINPROGRESS => {
            *in_progress = true;
            Attempt::WouldBlock(Direction::Writable)
        }
        libc::EINTR => Attempt::Interrupted,
        other => Attempt::Done(RawResult::Unit(Err(ErrorKind::from_errno(other)))),
    }
}

fn attempt_recv(fd: RawFd, buf: *mut u8, len: usize) -> Attempt {
    let res = unsafe { libc::recv(fd, buf as *mut libc::c_void, len, 0) };
    if res >= 0 {
        return Attempt::Done(RawResult::Count(Ok(res as usize)));
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::EAGAIN | libc::EWOULDBLOCK => Attempt::WouldBlock(Direction::Readable),
        libc::EINTR => Attempt::Interrupted,
        other => Attempt::Done(RawResult::Count(Err(ErrorKind::from_errno(other)))),
    }
}

fn attempt_send(fd: RawFd, buf: *mut u8, len: usize) -> Attempt {
    let res = unsafe { libc::send(fd, buf as *const libc::c_void, len, libc::MSG_NOSIGNAL) };
    if res >= 0 {
        return Attempt::Done(RawResult::Count(Ok(res as usize)));
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::EAGAIN | libc::EWOULDBLOCK => Attempt::WouldBlock(Direction::Writable),
        libc::EINTR => Attempt::Interrupted,
        other => Attempt::Done(RawResult::Count(Err(ErrorKind::from_errno(other)))),
    }
}

fn attempt_read(fd: RawFd, buf: *mut u8, len: usize, offset: i64) -> Attempt {
    let res = unsafe { libc::pread(fd, buf as *mut libc::c_void, len, offset as libc::off_t) };
    if res >= 0 {
        return Attempt::Done(RawResult::Count(Ok(res as usize)));
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::EAGAIN | libc::EWOULDBLOCK => Attempt::WouldBlock(Direction::Readable),
        libc::EINTR => Attempt::Interrupted,
        other => Attempt::Done(RawResult::Count(Err(ErrorKind::from_errno(other)))),
    }
}

fn attempt_write(fd: RawFd, buf: *mut u8, len: usize, offset: i64) -> Attempt {
    let res = unsafe { libc::pwrite(fd, buf as *const libc::c_void, len, offset as libc::off_t) };
    if res >= 0 {
        return Attempt::Done(RawResult::Count(Ok(res as usize)));
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::EAGAIN | libc::EWOULDBLOCK => Attempt::WouldBlock(Direction::Writable),
        libc::EINTR => Attempt::Interrupted,
        other => Attempt::Done(RawResult::Count(Err(ErrorKind::from_errno(other)))),
    }
}

fn attempt_close(fd: RawFd) -> Attempt {
    let res = unsafe { libc::close(fd) };
    if res == 0 {
        Attempt::Done(RawResult::Unit(Ok(())))
    } else {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        // EINTR on close must not be retried (POSIX: the fd's disposition
        // after an EINTR'd close is unspecified, retrying may close an
        // unrelated fd reused by a concurrent open). Surface it as Io.
        Attempt::Done(RawResult::Unit(Err(ErrorKind::from_errno(errno))))
    }
}
