//! A single-threaded, completion-based asynchronous I/O event loop over
//! kqueue (BSD/Darwin) or epoll (Linux/Android).
//!
//! Callers submit non-blocking file descriptor operations — [`accept`],
//! [`connect`], [`recv`], [`send`], [`read`], [`write`], [`close`], and a
//! pure [`timeout`] — against an externally allocated [`Completion`], and
//! receive the result through a user-supplied callback once the [`Loop`]
//! drives it to completion. `EAGAIN`/`EWOULDBLOCK` never reaches a callback:
//! the loop registers kernel interest and retries automatically on a later
//! iteration.
//!
//! [`accept`]: Loop::submit_accept
//! [`connect`]: Loop::submit_connect
//! [`recv`]: Loop::submit_recv
//! [`send`]: Loop::submit_send
//! [`read`]: Loop::submit_read
//! [`write`]: Loop::submit_write
//! [`close`]: Loop::submit_close
//! [`timeout`]: Loop::submit_timeout
//!
//! # Ownership
//!
//! A [`Completion`] is allocated and owned by the caller for its entire
//! lifetime. The loop only ever borrows it, from the moment a `submit_*`
//! method is called until its callback returns; do not move, free, or
//! resubmit one while it is borrowed (see [`Completion`] for the full
//! contract).
//!
//! # Threading
//!
//! A [`Loop`] is pinned to the thread that creates it: submission happens
//! only from that thread, or from within a callback the loop itself
//! dispatched. Fan-out across cores is done by running one loop per thread,
//! each with its own listening socket (see [`socket::set_reuseport`]), not
//! by sharing one loop across threads.
//!
//! # Example
//!
//! ```no_run
//! use evio::completion::Completion;
//! use evio::reactor::{Config, Loop};
//!
//! let mut event_loop = Loop::init(Config::default()).unwrap();
//! let deadline = event_loop.now();
//! let timeout = Completion::new();
//!
//! event_loop
//!     .submit_timeout(&timeout, std::ptr::null_mut::<()>(), |_ctx, _c, result| {
//!         assert!(result.is_ok());
//!     }, deadline)
//!     .unwrap();
//!
//! event_loop.run().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod macros;

pub mod clock;
pub mod completion;
pub mod error;
pub mod reactor;
pub mod socket;

mod ops;
mod queue;
mod sys;
mod timeout;

pub use clock::{Clock, MonotonicClock};
pub use completion::{Completion, OpKind, OpResult};
pub use error::{ErrorKind, LoopError, Misuse};
pub use reactor::{Config, ConfigBuilder, Loop};
pub use socket::{
    close_socket, listen_tcp, local_addr, open_socket_tcp, open_socket_udp, set_reuseport, Family,
    KeepAlive, SocketOptions,
};
