/// Runs a libc call, turning a `-1` return into `Err(io::Error::last_os_error())`.
///
/// Named and shaped after the teacher's own `syscall!` used throughout
/// `sys/unix/selector/{epoll,kqueue}.rs`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
