//! The coarse error taxonomy surfaced to completion callbacks.

use std::fmt;
use std::io;

/// The coarse error kind delivered to a completion's callback.
///
/// `WouldBlock` and `Interrupted` are never constructed outside of this
/// module: the loop treats them purely as internal retry signals (§7 of the
/// design) and never hands them to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The fd was closed out from under a pending operation, or the loop is
    /// shutting down.
    Canceled,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    /// A syscall reported a deadline exceeded, e.g. a TCP user timeout.
    /// Distinct from a `timeout` op completing.
    TimedOut,
    BrokenPipe,
    NotConnected,
    /// Programmer error: an invalid fd was passed at submission time.
    BadFileDescriptor,
    InvalidArgument,
    NoMemory,
    TooManyOpenFiles,
    NoBufferSpace,
    /// Catch-all for an errno this taxonomy doesn't name explicitly.
    Io,
}

impl ErrorKind {
    /// Maps a raw `errno` value to a coarse kind.
    ///
    /// Never returns a kind that represents `EAGAIN`/`EWOULDBLOCK` or
    /// `EINTR` — callers that need to special-case those should inspect the
    /// raw errno before calling this, as the operation handlers in [`crate::ops`]
    /// do.
    pub(crate) fn from_errno(errno: i32) -> ErrorKind {
        match errno {
            libc::ECONNREFUSED => ErrorKind::ConnectionRefused,
            libc::ECONNRESET => ErrorKind::ConnectionReset,
            libc::ECONNABORTED => ErrorKind::ConnectionAborted,
            libc::ETIMEDOUT => ErrorKind::TimedOut,
            libc::EPIPE => ErrorKind::BrokenPipe,
            libc::ENOTCONN => ErrorKind::NotConnected,
            libc::EBADF => ErrorKind::BadFileDescriptor,
            libc::EINVAL => ErrorKind::InvalidArgument,
            libc::ENOMEM => ErrorKind::NoMemory,
            libc::EMFILE | libc::ENFILE => ErrorKind::TooManyOpenFiles,
            libc::ENOBUFS => ErrorKind::NoBufferSpace,
            _ => ErrorKind::Io,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Canceled => "operation canceled",
            ErrorKind::ConnectionRefused => "connection refused",
            ErrorKind::ConnectionReset => "connection reset",
            ErrorKind::ConnectionAborted => "connection aborted",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::BrokenPipe => "broken pipe",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::BadFileDescriptor => "bad file descriptor",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NoMemory => "out of memory",
            ErrorKind::TooManyOpenFiles => "too many open files",
            ErrorKind::NoBufferSpace => "no buffer space available",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ErrorKind {}

/// A completion was submitted in violation of the one-submission-at-a-time
/// contract: it was still linked in a queue (see [`crate::completion::Completion`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Misuse {
    pub(crate) reason: MisuseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MisuseReason {
    StillLinked,
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            MisuseReason::StillLinked => {
                f.write_str("completion submitted while still linked in a queue")
            }
        }
    }
}

impl std::error::Error for Misuse {}

/// A fatal failure of the loop's driver, surfaced out of [`crate::Loop::run`] or
/// [`crate::Loop::run_for_ns`]. This is distinct from per-operation errors, which
/// are always delivered through a completion's callback.
#[derive(Debug)]
pub struct LoopError {
    source: io::Error,
}

impl LoopError {
    pub(crate) fn from_io(source: io::Error) -> LoopError {
        LoopError { source }
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event loop notifier failed: {}", self.source)
    }
}

impl std::error::Error for LoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
