//! Platform-specific kernel notifier backends (§4.D).
//!
//! Only Unix targets are supported; Windows IOCP is an explicit non-goal
//! (§1). [`unix::Notifier`] re-exports whichever of `epoll`/`kqueue` matches
//! the target OS.

#[cfg(unix)]
pub(crate) mod unix;
