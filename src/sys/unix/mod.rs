//! The kernel notifier (§4.D), one backend per target OS.
//!
//! Only one of these modules is ever compiled: `epoll` on Linux/Android,
//! `kqueue` everywhere else kqueue is available. Both export a `Notifier`
//! with the same shape, mirroring how the teacher's `sys/unix/mod.rs`
//! re-exports a single `Selector`/`Events` pair per platform.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use self::epoll::Notifier;

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod kqueue;
#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(crate) use self::kqueue::Notifier;
