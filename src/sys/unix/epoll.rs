//! Linux/Android backend for the kernel notifier (§4.D), over `epoll(7)`.
//!
//! epoll registers interest per file descriptor, not per direction, so a fd
//! with both a pending `recv` and a pending `send` shares a single
//! `epoll_ctl` entry carrying `EPOLLIN|EPOLLOUT`. `FdState` tracks which
//! completion (if any) is waiting on each direction for a given fd so a
//! ready event can be routed to the right one and the registration can be
//! re-armed (`EPOLLONESHOT` disarms on every event, by design — see §4.D)
//! for whichever direction is still outstanding.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

use libc::{EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

use crate::completion::{Completion, Direction};

#[derive(Clone, Copy)]
struct FdState {
    readable: Option<NonNull<Completion>>,
    writable: Option<NonNull<Completion>>,
}

impl FdState {
    fn empty() -> FdState {
        FdState {
            readable: None,
            writable: None,
        }
    }

    fn interest_bits(&self) -> u32 {
        let mut bits = EPOLLONESHOT as u32;
        if self.readable.is_some() {
            bits |= (EPOLLIN | EPOLLRDHUP) as u32;
        }
        if self.writable.is_some() {
            bits |= EPOLLOUT as u32;
        }
        bits
    }

    fn is_empty(&self) -> bool {
        self.readable.is_none() && self.writable.is_none()
    }
}

pub(crate) struct Notifier {
    epoll: OwnedFd,
    fds: HashMap<RawFd, FdState>,
    events: Vec<libc::epoll_event>,
}

impl Notifier {
    pub(crate) fn new(entries_hint: usize) -> std::io::Result<Notifier> {
        let epoll = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Notifier {
            epoll,
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
        let existed = self.fds.contains_key(&fd);
        let mut candidate = self.fds.get(&fd).copied().unwrap_or_else(FdState::empty);

        match direction {
            Direction::Readable => {
                debug_assert!(candidate.readable.is_none(), "fd {fd} already has a pending readable interest");
                candidate.readable = Some(completion);
            }
            Direction::Writable => {
                debug_assert!(candidate.writable.is_none(), "fd {fd} already has a pending writable interest");
                candidate.writable = Some(completion);
            }
        }

        let mut event = libc::epoll_event {
            events: candidate.interest_bits(),
            u64: fd as u64,
        };

        let op = if existed {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        // Only commit `candidate` once epoll_ctl has actually armed it —
        // on failure the kernel knows nothing about `completion`, and
        // leaving a stale entry in `self.fds` would dangle (the reactor
        // re-queues `completion` as failed the moment this call returns
        // `Err`, so the caller may free or resubmit it immediately).
        syscall!(epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event))?;
        self.fds.insert(fd, candidate);
        Ok(())
    }

    /// Blocks up to `timeout_ns` (or forever if `None`), appending every
    /// completion that became ready to `ready`.
    pub(crate) fn poll(
        &mut self,
        timeout_ns: Option<u64>,
        ready: &mut Vec<NonNull<Completion>>,
    ) -> std::io::Result<()> {
        let timeout_ms = match timeout_ns {
            None => -1,
            Some(ns) => ((ns + 999_999) / 1_000_000) as libc::c_int,
        };

        self.events.clear();
        let cap = self.events.capacity();
        unsafe { self.events.set_len(cap) };

        let n = syscall!(epoll_wait(
            self.epoll.as_raw_fd(),
            self.events.as_mut_ptr(),
            cap as i32,
            timeout_ms,
        ))?;
        unsafe { self.events.set_len(n as usize) };

        for event in &self.events[..n as usize] {
            let fd = event.u64 as RawFd;
            let readable = event.events as i32 & (EPOLLIN | EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) != 0;
            let writable = event.events as i32 & (EPOLLOUT | libc::EPOLLHUP | libc::EPOLLERR) != 0;

            let Some(state) = self.fds.get_mut(&fd) else {
                continue;
            };

            if readable {
                if let Some(c) = state.readable.take() {
                    ready.push(c);
                }
            }
            if writable {
                if let Some(c) = state.writable.take() {
                    ready.push(c);
                }
            }

            if state.is_empty() {
                self.fds.remove(&fd);
                let _ = syscall!(epoll_ctl(
                    self.epoll.as_raw_fd(),
                    libc::EPOLL_CTL_DEL,
                    fd,
                    std::ptr::null_mut(),
                ));
            } else {
                let mut rearm = libc::epoll_event {
                    events: state.interest_bits(),
                    u64: fd as u64,
                };
                let _ = syscall!(epoll_ctl(
                    self.epoll.as_raw_fd(),
                    libc::EPOLL_CTL_MOD,
                    fd,
                    &mut rearm,
                ));
            }
        }

        Ok(())
    }

    /// Whether any fd currently has interest registered. Used by the loop to
    /// decide whether `run_for_ns` may still have something worth blocking
    /// for even when no timeout is scheduled (§4.F step 5).
    pub(crate) fn is_idle(&self) -> bool {
        self.fds.is_empty()
    }

    /// Drops any waiting interest registered for `fd` (used when the fd is
    /// closed out from under a pending completion — §5 cancellation path),
    /// returning whichever completions were parked there so the caller can
    /// complete them with `Canceled` rather than leaving them stuck forever.
    pub(crate) fn forget(&mut self, fd: RawFd) -> Vec<NonNull<Completion>> {
        let Some(state) = self.fds.remove(&fd) else {
            return Vec::new();
        };
        let _ = syscall!(epoll_ctl(
            self.epoll.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut(),
        ));
        state.readable.into_iter().chain(state.writable).collect()
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}
