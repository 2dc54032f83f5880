//! BSD/Darwin backend for the kernel notifier (§4.D), over `kqueue(2)`.
//!
//! Unlike epoll, kqueue tracks readability and writability as independent
//! filters (`EVFILT_READ`/`EVFILT_WRITE`) on the same fd, and each filter
//! carries its own opaque `udata` word. That means a completion's pointer
//! can be stashed directly as `udata` — no side table of fd to completion
//! is needed, unlike the epoll backend. `EV_ONESHOT` disarms the filter
//! after it fires once, matching the one-shot semantics §4.D requires.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

use crate::completion::{Completion, Direction};

/// Tracks which completion (if any) is parked on each filter for a given fd.
///
/// kqueue itself needs none of this — `udata` alone is enough to route a
/// ready event straight back to its completion. This side table exists
/// purely so [`Notifier::forget`] can find and cancel completions still
/// parked on a fd that the caller is about to close, same as the epoll
/// backend's `FdState` does out of necessity.
#[derive(Default)]
struct FdState {
    readable: Option<NonNull<Completion>>,
    writable: Option<NonNull<Completion>>,
}

impl FdState {
    fn is_empty(&self) -> bool {
        self.readable.is_none() && self.writable.is_none()
    }
}

pub(crate) struct Notifier {
    kq: OwnedFd,
    fds: HashMap<RawFd, FdState>,
    events: Vec<libc::kevent>,
}

impl Notifier {
    pub(crate) fn new(entries_hint: usize) -> std::io::Result<Notifier> {
        let kq = unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) };
        // kqueue fds are not inherited across exec by default on any
        // supported BSD, but set FD_CLOEXEC explicitly to not rely on it.
        syscall!(fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Notifier {
            kq,
            fds: HashMap::new(),
            events: Vec::with_capacity(entries_hint.max(64)),
        })
    }

    pub(crate) fn register_interest(
        &mut self,
        fd: RawFd,
        direction: Direction,
        completion: NonNull<Completion>,
    ) -> std::io::Result<()> {
        let filter = match direction {
            Direction::Readable => libc::EVFILT_READ,
            Direction::Writable => libc::EVFILT_WRITE,
        };

        let event = libc::kevent {
            ident: fd as usize,
            filter,
            flags: libc::EV_ADD | libc::EV_ONESHOT | libc::EV_RECEIPT,
            fflags: 0,
            data: 0,
            udata: completion.as_ptr() as *mut _,
        };

        let mut out = event;
        let res = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                &event,
                1,
                &mut out,
                1,
                std::ptr::null(),
            )
        };
        if res == -1 {
            return Err(std::io::Error::last_os_error());
        }

        // EV_RECEIPT always returns one event describing the outcome of the
        // change, even on success; an EV_ERROR with a nonzero data is a real
        // failure, a zero data is just the receipt acknowledgement.
        if out.flags & libc::EV_ERROR != 0 && out.data != 0 {
            return Err(std::io::Error::from_raw_os_error(out.data as i32));
        }

        let state = self.fds.entry(fd).or_default();
        match direction {
            Direction::Readable => state.readable = Some(completion),
            Direction::Writable => state.writable = Some(completion),
        }

        Ok(())
    }

    pub(crate) fn poll(
        &mut self,
        timeout_ns: Option<u64>,
        ready: &mut Vec<NonNull<Completion>>,
    ) -> std::io::Result<()> {
        let timeout = timeout_ns.map(|ns| libc::timespec {
            tv_sec: (ns / 1_000_000_000) as libc::time_t,
            tv_nsec: (ns % 1_000_000_000) as libc::c_long,
        });
        let timeout_ptr = timeout
            .as_ref()
            .map_or(std::ptr::null(), |t| t as *const libc::timespec);

        self.events.clear();
        let cap = self.events.capacity();
        unsafe { self.events.set_len(cap) };

        let n = syscall!(kevent(
            self.kq.as_raw_fd(),
            std::ptr::null(),
            0,
            self.events.as_mut_ptr(),
            cap as i32,
            timeout_ptr,
        ))?;
        unsafe { self.events.set_len(n as usize) };

        for event in &self.events[..n as usize] {
            if event.udata.is_null() {
                continue;
            }
            let fd = event.ident as RawFd;
            if let Some(state) = self.fds.get_mut(&fd) {
                match event.filter {
                    libc::EVFILT_READ => state.readable = None,
                    libc::EVFILT_WRITE => state.writable = None,
                    _ => {}
                }
                if state.is_empty() {
                    self.fds.remove(&fd);
                }
            }
            if let Some(c) = NonNull::new(event.udata as *mut Completion) {
                ready.push(c);
            }
        }

        Ok(())
    }

    /// Whether any fd currently has a filter registered. Used by the loop to
    /// decide whether `run_for_ns` may still have something worth blocking
    /// for even when no timeout is scheduled (§4.F step 5).
    pub(crate) fn is_idle(&self) -> bool {
        self.fds.is_empty()
    }

    /// Drops any pending kevent registration for `fd` (§5 cancellation
    /// path), returning whichever completions were parked there so the
    /// caller can complete them with `Canceled`. `EV_ONESHOT` filters that
    /// never fired are still registered and must be explicitly deleted;
    /// `EV_DELETE` on an absent filter is harmless (`ENOENT`, ignored).
    pub(crate) fn forget(&mut self, fd: RawFd) -> Vec<NonNull<Completion>> {
        for filter in [libc::EVFILT_READ, libc::EVFILT_WRITE] {
            let event = libc::kevent {
                ident: fd as usize,
                filter,
                flags: libc::EV_DELETE | libc::EV_RECEIPT,
                fflags: 0,
                data: 0,
                udata: std::ptr::null_mut(),
            };
            let mut out = event;
            unsafe {
                libc::kevent(
                    self.kq.as_raw_fd(),
                    &event,
                    1,
                    &mut out,
                    1,
                    std::ptr::null(),
                );
            }
        }

        let Some(state) = self.fds.remove(&fd) else {
            return Vec::new();
        };
        state.readable.into_iter().chain(state.writable).collect()
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.kq.as_raw_fd()
    }
}
