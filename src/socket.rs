//! Socket construction helpers (§5, §6), grounded in the teacher's
//! `sys/unix/socket.rs` and `sys/unix/tcp/{listener,stream}.rs`: raw `libc`
//! calls rather than a higher-level socket crate, matching the dependency
//! set actually declared in `Cargo.toml` (`libc` only, no `socket2`).

use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::ErrorKind;

/// Keepalive tuning, applied via `TCP_KEEPIDLE`/`TCP_KEEPINTVL`/`TCP_KEEPCNT`
/// where the target OS exposes them.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

/// Options accepted by [`open_socket_tcp`]/[`open_socket_udp`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub rcvbuf: Option<usize>,
    pub sndbuf: Option<usize>,
    pub keepalive: Option<KeepAlive>,
    pub user_timeout_ms: Option<u32>,
    pub nodelay: bool,
}

/// Opens a non-blocking TCP socket for `family` (the address family of the
/// addresses the caller intends to bind/connect, not a bound address
/// itself), applying `options`.
pub fn open_socket_tcp(family: Family, options: SocketOptions) -> Result<RawFd, ErrorKind> {
    open_socket(family, libc::SOCK_STREAM, options, true)
}

/// Opens a non-blocking UDP socket for `family`, applying `options`
/// (`keepalive`/`nodelay`/`user_timeout_ms` are meaningless for UDP and are
/// silently ignored).
pub fn open_socket_udp(family: Family, options: SocketOptions) -> Result<RawFd, ErrorKind> {
    open_socket(family, libc::SOCK_DGRAM, options, false)
}

/// Closes `fd` directly via `close(2)`. Distinct from the loop's `close` op:
/// this is for sockets that were never submitted to a loop (e.g. a listener
/// torn down at shutdown).
pub fn close_socket(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Address family to construct a socket for. Mirrors the teacher's
/// `new_v4`/`new_v6` split on `TcpSocket` without requiring a concrete
/// address up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

fn open_socket(
    family: Family,
    sock_type: libc::c_int,
    options: SocketOptions,
    is_tcp: bool,
) -> Result<RawFd, ErrorKind> {
    let domain = match family {
        Family::V4 => libc::AF_INET,
        Family::V6 => libc::AF_INET6,
    };

    let fd = unsafe {
        libc::socket(
            domain,
            sock_type | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd == -1 {
        return Err(last_errno());
    }

    if let Some(rcvbuf) = options.rcvbuf {
        set_sockopt(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, rcvbuf as libc::c_int)?;
    }
    if let Some(sndbuf) = options.sndbuf {
        set_sockopt(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, sndbuf as libc::c_int)?;
    }

    if is_tcp {
        if options.nodelay {
            set_sockopt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1 as libc::c_int)?;
        }
        if let Some(ka) = options.keepalive {
            set_sockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1 as libc::c_int)?;
            apply_keepalive_tuning(fd, ka);
        }
        if let Some(ms) = options.user_timeout_ms {
            apply_user_timeout(fd, ms);
        }
    }

    Ok(fd)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn apply_keepalive_tuning(fd: RawFd, ka: KeepAlive) {
    let _ = set_sockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, ka.idle.as_secs() as libc::c_int);
    let _ = set_sockopt(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_KEEPINTVL,
        ka.interval.as_secs() as libc::c_int,
    );
    let _ = set_sockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, ka.retries as libc::c_int);
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn apply_keepalive_tuning(_fd: RawFd, _ka: KeepAlive) {
    // BSD/Darwin expose a single TCP_KEEPALIVE knob (seconds until the
    // first probe) rather than idle/interval/count; approximate with idle.
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn apply_user_timeout(fd: RawFd, ms: u32) {
    let _ = set_sockopt(fd, libc::IPPROTO_TCP, libc::TCP_USER_TIMEOUT, ms as libc::c_int);
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn apply_user_timeout(_fd: RawFd, _ms: u32) {
    // No portable equivalent of TCP_USER_TIMEOUT outside Linux.
}

fn set_sockopt(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> Result<(), ErrorKind> {
    let res = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res == -1 {
        Err(last_errno())
    } else {
        Ok(())
    }
}

fn last_errno() -> ErrorKind {
    ErrorKind::from_errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

/// A `sockaddr_in`/`sockaddr_in6` ready to pass to `bind`/`connect`, with
/// its address family resolved at construction time rather than inferred
/// from a pointer cast.
pub(crate) enum SocketAddrCRepr {
    V4(libc::sockaddr_in),
    V6(libc::sockaddr_in6),
}

impl SocketAddrCRepr {
    pub(crate) fn as_ptr(&self) -> *const u8 {
        match self {
            SocketAddrCRepr::V4(addr) => addr as *const _ as *const u8,
            SocketAddrCRepr::V6(addr) => addr as *const _ as *const u8,
        }
    }
}

/// Converts a [`SocketAddr`] into the raw C representation `connect`/`bind`
/// expect, alongside its length. Mirrors the teacher's
/// `sys/unix/net.rs::socket_addr`.
pub(crate) fn socket_addr_to_raw(addr: SocketAddr) -> (SocketAddrCRepr, libc::socklen_t) {
    match addr {
        SocketAddr::V4(addr) => {
            let sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.ip().octets()),
            };
            let sockaddr = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: addr.port().to_be(),
                sin_addr,
                sin_zero: [0; 8],
                #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
                sin_len: 0,
            };
            (
                SocketAddrCRepr::V4(sockaddr),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        SocketAddr::V6(addr) => {
            let sockaddr = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: addr.port().to_be(),
                sin6_addr: libc::in6_addr {
                    s6_addr: addr.ip().octets(),
                },
                sin6_flowinfo: addr.flowinfo(),
                sin6_scope_id: addr.scope_id(),
                #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
                sin6_len: 0,
            };
            (
                SocketAddrCRepr::V6(sockaddr),
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}

/// Binds and listens on `addr`, returning the listening fd. Convenience
/// used by integration tests and by callers setting up `accept` loops;
/// grounded in the teacher's `sys/unix/tcp/listener.rs::bind`.
pub fn listen_tcp(addr: SocketAddr, backlog: i32) -> Result<RawFd, ErrorKind> {
    let family = match addr {
        SocketAddr::V4(_) => Family::V4,
        SocketAddr::V6(_) => Family::V6,
    };
    let fd = open_socket_tcp(family, SocketOptions::default())?;

    set_sockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;

    let (raw, len) = socket_addr_to_raw(addr);
    let res = unsafe { libc::bind(fd, raw.as_ptr() as *const libc::sockaddr, len) };
    if res == -1 {
        let err = last_errno();
        close_socket(fd);
        return Err(err);
    }

    let res = unsafe { libc::listen(fd, backlog) };
    if res == -1 {
        let err = last_errno();
        close_socket(fd);
        return Err(err);
    }

    Ok(fd)
}

/// Returns the local address `fd` is bound to, e.g. to discover the
/// ephemeral port after binding `127.0.0.1:0`. Grounded in the teacher's
/// `sys/unix/net.rs::to_socket_addr`, but extracts the fields explicitly
/// instead of transmuting `sockaddr_storage` straight into
/// `std::net::SocketAddrV4`/`V6`, whose layout isn't part of their contract.
pub fn local_addr(fd: RawFd) -> Result<SocketAddr, ErrorKind> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let res = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if res == -1 {
        return Err(last_errno());
    }

    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: libc::sockaddr_in = unsafe { *(&storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(std::net::SocketAddrV4::new(
                ip,
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let addr: libc::sockaddr_in6 = unsafe { *(&storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(ErrorKind::InvalidArgument),
    }
}

/// Enables `SO_REUSEPORT` on `fd` so multiple independent loops (each on
/// its own thread, §5) may each bind the same address and let the kernel
/// fan out accepted connections across them.
///
/// Portability: Linux and the BSDs both implement `SO_REUSEPORT`, but their
/// load-balancing hash differs (Linux hashes the 4-tuple; the BSDs/Darwin
/// round-robin or hash depending on version) — this crate does not attempt
/// to normalize that difference, matching the source's silence on exact
/// fan-out behavior (§9 design notes, resolved in DESIGN.md).
pub fn set_reuseport(fd: RawFd) -> Result<(), ErrorKind> {
    set_sockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1)
}
