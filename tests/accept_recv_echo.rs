//! S2 (accept loop) and S3 (echo): a real `std::net` client connects to a
//! listener driven entirely through the loop's `accept`/`recv`/`send`/`close`
//! ops, round-tripping a message and observing the peer-close as a `Ok(0)`
//! `recv`.

use std::cell::{Cell, UnsafeCell};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

use evio::completion::Completion;
use evio::reactor::{Config, Loop};
use evio::socket;

const MESSAGE: &[u8] = b"Hello, World!";
const MESSAGE_LEN: usize = MESSAGE.len();

struct State {
    event_loop: *mut Loop,
    accepted_fd: Cell<RawFd>,
    recv_buf: UnsafeCell<[u8; MESSAGE_LEN]>,
    echoed: Cell<bool>,
    saw_peer_close: Cell<bool>,
    c_recv: Completion,
    c_send: Completion,
    c_recv_again: Completion,
    c_close_conn: Completion,
}

fn on_accept(state: *mut State, _c: &mut Completion, result: evio::OpResult<RawFd>) {
    let state = unsafe { &*state };
    let fd = result.expect("accept should succeed");
    state.accepted_fd.set(fd);
    let event_loop = unsafe { &mut *state.event_loop };
    let buf: &mut [u8] = unsafe { &mut *state.recv_buf.get() };
    event_loop
        .submit_recv(&state.c_recv, state as *const State as *mut State, on_recv, fd, buf)
        .unwrap();
}

fn on_recv(state: *mut State, _c: &mut Completion, result: evio::OpResult<usize>) {
    let state = unsafe { &*state };
    let n = result.expect("recv should succeed");
    assert_eq!(n, MESSAGE.len());
    assert_eq!(unsafe { &(*state.recv_buf.get())[..n] }, MESSAGE);

    let event_loop = unsafe { &mut *state.event_loop };
    let fd = state.accepted_fd.get();
    let buf: &[u8] = unsafe { &(*state.recv_buf.get())[..n] };
    event_loop
        .submit_send(&state.c_send, state as *const State as *mut State, on_send, fd, buf)
        .unwrap();
}

fn on_send(state: *mut State, _c: &mut Completion, result: evio::OpResult<usize>) {
    let state = unsafe { &*state };
    let n = result.expect("send should succeed");
    assert_eq!(n, MESSAGE.len());
    state.echoed.set(true);

    // S2: a follow-up recv on the accepted socket reads 0 once the peer
    // closes its end.
    let event_loop = unsafe { &mut *state.event_loop };
    let fd = state.accepted_fd.get();
    let buf: &mut [u8] = unsafe { &mut *state.recv_buf.get() };
    event_loop
        .submit_recv(&state.c_recv_again, state as *const State as *mut State, on_recv_again, fd, buf)
        .unwrap();
}

fn on_recv_again(state: *mut State, _c: &mut Completion, result: evio::OpResult<usize>) {
    let state = unsafe { &*state };
    let n = result.expect("recv after peer close should succeed, not error");
    assert_eq!(n, 0, "peer closed its end, recv should read 0 bytes");
    state.saw_peer_close.set(true);

    let event_loop = unsafe { &mut *state.event_loop };
    let fd = state.accepted_fd.get();
    event_loop
        .submit_close(
            &state.c_close_conn,
            std::ptr::null_mut::<()>(),
            |_ctx, _c, result| {
                result.expect("close should succeed");
            },
            fd,
        )
        .unwrap();
}

#[test]
fn accept_recv_echo_then_peer_close() {
    let listener = socket::listen_tcp("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let addr = socket::local_addr(listener).unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(MESSAGE).unwrap();
        let mut response = [0u8; MESSAGE_LEN];
        stream.read_exact(&mut response).unwrap();
        assert_eq!(&response[..], MESSAGE);
        // Dropping `stream` here closes the client's end, which the server
        // side observes as a zero-length recv.
    });

    let mut event_loop = Loop::init(Config::default()).unwrap();
    let c_accept = Completion::new();
    let mut state = State {
        event_loop: &mut event_loop as *mut Loop,
        accepted_fd: Cell::new(-1),
        recv_buf: UnsafeCell::new([0u8; MESSAGE_LEN]),
        echoed: Cell::new(false),
        saw_peer_close: Cell::new(false),
        c_recv: Completion::new(),
        c_send: Completion::new(),
        c_recv_again: Completion::new(),
        c_close_conn: Completion::new(),
    };

    event_loop
        .submit_accept(&c_accept, &mut state as *mut State, on_accept, listener)
        .unwrap();

    event_loop
        .run_for_ns(Duration::from_secs(5).as_nanos() as u64)
        .unwrap();

    assert!(state.echoed.get());
    assert!(state.saw_peer_close.get());

    client.join().unwrap();
    socket::close_socket(listener);
}
