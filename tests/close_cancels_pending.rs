//! Property 7: closing an fd while a `recv` is still pending on it causes
//! that `recv`'s callback to fire with a cancellation error on the next
//! iteration, rather than waiting forever.

use std::cell::{Cell, RefCell};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{IntoRawFd, RawFd};
use std::thread;
use std::time::Duration;

use evio::completion::Completion;
use evio::error::ErrorKind;
use evio::reactor::{Config, Loop};

struct State {
    recv_result: RefCell<Option<evio::OpResult<usize>>>,
    close_ok: Cell<bool>,
}

fn on_recv(state: *mut State, _c: &mut Completion, result: evio::OpResult<usize>) {
    let state = unsafe { &*state };
    *state.recv_result.borrow_mut() = Some(result);
}

fn on_close(state: *mut State, _c: &mut Completion, result: evio::OpResult<()>) {
    let state = unsafe { &*state };
    state.close_ok.set(result.is_ok());
}

#[test]
fn closing_fd_cancels_pending_recv() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // The peer just holds the connection open without ever writing, so the
    // recv submitted below has no choice but to go would-block and park.
    let peer = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_secs(2));
        drop(stream);
    });

    let stream = TcpStream::connect(addr).unwrap();
    stream.set_nonblocking(true).unwrap();
    let fd: RawFd = stream.into_raw_fd();

    let mut event_loop = Loop::init(Config::default()).unwrap();
    let c_recv = Completion::new();
    let c_close = Completion::new();
    let mut buf = [0u8; 16];
    let mut state = State {
        recv_result: RefCell::new(None),
        close_ok: Cell::new(false),
    };

    event_loop
        .submit_recv(&c_recv, &mut state as *mut State, on_recv, fd, &mut buf)
        .unwrap();

    // One zero-budget iteration is enough to attempt the recv, see
    // would-block, and park it in the notifier's waiting set.
    event_loop.run().unwrap();
    assert!(state.recv_result.borrow().is_none(), "recv should still be pending");

    event_loop
        .submit_close(&c_close, &mut state as *mut State, on_close, fd)
        .unwrap();

    event_loop
        .run_for_ns(Duration::from_secs(5).as_nanos() as u64)
        .unwrap();

    assert!(state.close_ok.get(), "close itself should succeed");
    let recv_result = state.recv_result.borrow_mut().take();
    match recv_result {
        Some(Err(ErrorKind::Canceled)) => {}
        other => panic!("expected recv to be canceled by the close, got {other:?}"),
    }

    peer.join().unwrap();
}
