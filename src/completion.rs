//! The externally allocated unit of work (§3, §4.C).

use std::cell::UnsafeCell;
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use crate::error::ErrorKind;

/// One of the eight operations a [`Completion`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Accept,
    Connect,
    Recv,
    Send,
    Read,
    Write,
    Close,
    Timeout,
}

/// Operation-specific arguments, filled in by the submission methods in
/// [`crate::Loop`]. Each variant carries only the data that operation needs.
pub(crate) enum Op {
    Accept {
        fd: RawFd,
    },
    Connect {
        fd: RawFd,
        addr: SocketAddr,
        in_progress: bool,
    },
    Recv {
        fd: RawFd,
        buf: NonNull<u8>,
        len: usize,
    },
    Send {
        fd: RawFd,
        buf: NonNull<u8>,
        len: usize,
    },
    Read {
        fd: RawFd,
        buf: NonNull<u8>,
        len: usize,
        offset: i64,
    },
    Write {
        fd: RawFd,
        buf: NonNull<u8>,
        len: usize,
        offset: i64,
    },
    Close {
        fd: RawFd,
    },
    Timeout {
        deadline_ns: u64,
        seq: u64,
    },
}

impl Op {
    pub(crate) fn kind(&self) -> OpKind {
        match self {
            Op::Accept { .. } => OpKind::Accept,
            Op::Connect { .. } => OpKind::Connect,
            Op::Recv { .. } => OpKind::Recv,
            Op::Send { .. } => OpKind::Send,
            Op::Read { .. } => OpKind::Read,
            Op::Write { .. } => OpKind::Write,
            Op::Close { .. } => OpKind::Close,
            Op::Timeout { .. } => OpKind::Timeout,
        }
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        match self {
            Op::Accept { fd }
            | Op::Connect { fd, .. }
            | Op::Recv { fd, .. }
            | Op::Send { fd, .. }
            | Op::Read { fd, .. }
            | Op::Write { fd, .. }
            | Op::Close { fd } => Some(*fd),
            Op::Timeout { .. } => None,
        }
    }
}

/// The result handed to a completion's callback. `T` is one of `RawFd`
/// (accept), `usize` (byte counts), or `()` (connect/close/timeout).
pub type OpResult<T> = Result<T, ErrorKind>;

/// The fully type-erased result of an operation, as stored on the
/// completion between the syscall attempt and the callback dispatch. The
/// generic submission wrapper and `invoke` perform the single cast back to
/// the op's real result type (design note: "the generic wrapper performs
/// the single cast").
pub(crate) enum RawResult {
    Accept(OpResult<RawFd>),
    Unit(OpResult<()>),
    Count(OpResult<usize>),
}

/// Where a completion currently lives. Doubles as the misuse-detection flag
/// (§4.C: "Fails with Misuse if a completion is submitted while still
/// linked") and as the intrusive queue's next-pointer — a single field
/// plays both roles, with `Unlinked` acting as the tombstone sentinel the
/// design notes call for.
#[derive(Clone, Copy)]
pub(crate) enum Link {
    /// Not reachable from any queue; safe to (re)submit.
    Unlinked,
    /// Linked into `unqueued` or `completed`. `next` is the following node,
    /// or `None` if this is the queue's tail.
    Linked { next: Option<NonNull<Completion>> },
    /// Parked in the notifier's waiting set for `direction`. Queues never
    /// traverse a waiting completion, so no `next` is needed.
    Waiting { direction: Direction },
    /// Parked in the timeout set, awaiting its deadline. Not a `Fifo`, so
    /// unlike `Linked` there is no `next` pointer — this variant exists
    /// purely so a pending timeout still reads as "linked" for misuse
    /// detection and the §3 reachable-from-exactly-one-bucket invariant.
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Readable,
    Writable,
}

/// The type-erased callback stored on a completion. `context` is the
/// caller-supplied pointer passed back verbatim; `result` carries the
/// outcome for the op this completion ran.
///
/// This is always a monomorphized trampoline generated by the submission
/// method for the concrete context/result types involved, never the user's
/// callback directly — that pointer lives in `user_callback` instead, cast
/// to `*const ()` and cast back inside the trampoline (the "single cast"
/// design note). Splitting the two is what lets the trampoline recover the
/// user's exact `fn(*mut T, &mut Completion, OpResult<R>)` type without
/// boxing or allocating.
pub(crate) type RawCallback = unsafe fn(context: *mut (), completion: &mut Completion, result: RawResult);

/// The single externally allocated unit of work.
///
/// The caller owns this memory for its entire lifetime. [`crate::Loop`] only
/// ever borrows it, from the moment a submission method is called until the
/// callback returns. Do not move, free, or resubmit a `Completion` while it
/// is borrowed — the submission methods detect the most common mistake
/// (resubmitting a linked completion) and fail with
/// [`crate::error::Misuse`] rather than corrupting a queue.
///
/// Mirrors the teacher's `Overlapped`: a plain struct embedding a callback
/// function pointer, safe to move between threads only because the loop
/// that touches it never actually shares it across threads (submission is
/// same-thread only, §5).
#[repr(C)]
pub struct Completion {
    pub(crate) link: UnsafeCell<Link>,
    pub(crate) op: UnsafeCell<Op>,
    pub(crate) context: UnsafeCell<*mut ()>,
    pub(crate) callback: UnsafeCell<RawCallback>,
    /// The user's own typed callback, cast to `*const ()`. See
    /// [`RawCallback`] for why this lives apart from `callback`.
    pub(crate) user_callback: UnsafeCell<*const ()>,
    /// Holds a completed op's result between step 3/4 (where the syscall
    /// or timeout runs) and step 2 of the following dispatch (where the
    /// callback actually consumes it). `None` whenever the completion is
    /// anywhere other than `completed`.
    result: UnsafeCell<Option<RawResult>>,
}

unsafe impl Send for Completion {}

impl Completion {
    /// An unsubmitted completion. Every field is overwritten by the
    /// submission methods before the completion is queued; the values here
    /// only need to make `is_linked` report `false`.
    pub fn new() -> Completion {
        Completion {
            link: UnsafeCell::new(Link::Unlinked),
            op: UnsafeCell::new(Op::Close { fd: -1 }),
            context: UnsafeCell::new(std::ptr::null_mut()),
            callback: UnsafeCell::new(noop_callback),
            user_callback: UnsafeCell::new(std::ptr::null()),
            result: UnsafeCell::new(None),
        }
    }

    /// Stashes `result`, to be read back exactly once by
    /// `take_stashed_result` when this completion is dispatched.
    pub(crate) fn stash_result(&self, result: RawResult) {
        unsafe { *self.result.get() = Some(result) };
    }

    /// Takes the stashed result. Panics if none was stashed — every
    /// completion pushed to `completed` must have one.
    pub(crate) fn take_stashed_result(&self) -> RawResult {
        unsafe { &mut *self.result.get() }
            .take()
            .expect("dispatched completion had no stashed result")
    }

    /// Writes the trampoline and user callback pointer in one place so
    /// every submission method fills them in identically.
    pub(crate) fn set_callback(&self, callback: RawCallback, user_callback: *const ()) {
        unsafe {
            *self.callback.get() = callback;
            *self.user_callback.get() = user_callback;
        }
    }

    pub(crate) fn user_callback(&self) -> *const () {
        unsafe { *self.user_callback.get() }
    }

    pub(crate) fn set_context(&self, context: *mut ()) {
        unsafe { *self.context.get() = context };
    }

    pub(crate) fn context(&self) -> *mut () {
        unsafe { *self.context.get() }
    }

    pub(crate) fn set_op(&self, op: Op) {
        unsafe { *self.op.get() = op };
    }

    pub(crate) fn is_linked(&self) -> bool {
        !matches!(unsafe { *self.link.get() }, Link::Unlinked)
    }

    pub(crate) fn kind(&self) -> OpKind {
        unsafe { (*self.op.get()).kind() }
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        unsafe { (*self.op.get()).fd() }
    }

    /// Invokes the stored callback with `result`, the one place a
    /// completion's type erasure is undone.
    pub(crate) fn invoke(&self, result: RawResult) {
        let callback = unsafe { *self.callback.get() };
        let context = unsafe { *self.context.get() };
        let this = self as *const Completion as *mut Completion;
        unsafe { callback(context, &mut *this, result) };
    }
}

impl Default for Completion {
    fn default() -> Completion {
        Completion::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind())
            .field("linked", &self.is_linked())
            .finish()
    }
}

unsafe fn noop_callback(_context: *mut (), _completion: &mut Completion, _result: RawResult) {}
