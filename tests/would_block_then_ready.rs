//! S5: a `recv` submitted against a socket with no data available yet does
//! not fire its callback during an iteration where nothing is ready; once
//! the peer writes, the next `run_for_ns` delivers the bytes.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{IntoRawFd, RawFd};
use std::thread;
use std::time::Duration;

use evio::completion::Completion;
use evio::reactor::{Config, Loop};

const PAYLOAD: &[u8] = b"ready now";

struct State {
    fired: Cell<bool>,
    buf: RefCell<[u8; 64]>,
    received: Cell<usize>,
}

fn on_recv(state: *mut State, _c: &mut Completion, result: evio::OpResult<usize>) {
    let state = unsafe { &*state };
    let n = result.expect("recv should succeed once data is ready");
    state.fired.set(true);
    state.received.set(n);
}

#[test]
fn recv_waits_quietly_then_fires_once_peer_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(200));
        stream.write_all(PAYLOAD).unwrap();
        // Keep the stream alive until the reader side is done with it.
        thread::sleep(Duration::from_secs(1));
    });

    let stream = TcpStream::connect(addr).unwrap();
    stream.set_nonblocking(true).unwrap();
    let fd: RawFd = stream.into_raw_fd();

    let mut event_loop = Loop::init(Config::default()).unwrap();
    let c_recv = Completion::new();
    let mut state = State {
        fired: Cell::new(false),
        buf: RefCell::new([0u8; 64]),
        received: Cell::new(0),
    };

    {
        let mut buf = state.buf.borrow_mut();
        event_loop
            .submit_recv(&c_recv, &mut state as *mut State, on_recv, fd, &mut buf[..])
            .unwrap();
    }

    // No data has been written yet: a single zero-budget iteration must not
    // invoke the callback.
    event_loop.run().unwrap();
    assert!(!state.fired.get(), "recv fired before the peer wrote anything");

    // The peer writes ~200ms in; give the loop ample budget to notice it.
    event_loop
        .run_for_ns(Duration::from_secs(5).as_nanos() as u64)
        .unwrap();

    assert!(state.fired.get(), "recv never fired after the peer wrote");
    assert_eq!(state.received.get(), PAYLOAD.len());
    assert_eq!(&state.buf.borrow()[..PAYLOAD.len()], PAYLOAD);

    evio::socket::close_socket(fd);
    peer.join().unwrap();
}
