//! S6: 1000 zero-deadline timeouts submitted up front, then `run()` called
//! 1000 times. Timing-sensitive and hardware-dependent, so this is `#[ignore]`d
//! rather than run on every `cargo test`.

use std::cell::Cell;
use std::time::{Duration, Instant};

use evio::completion::Completion;
use evio::reactor::{Config, Loop};

const OPS: usize = 1000;

#[test]
#[ignore = "timing-sensitive throughput measurement, not part of normal test runs"]
fn thousand_immediate_timeouts_under_100us_each() {
    let mut event_loop = Loop::init(Config::default()).unwrap();
    let completions: Vec<Completion> = (0..OPS).map(|_| Completion::new()).collect();
    let fired = Cell::new(0usize);
    let deadline = event_loop.now();

    for c in &completions {
        event_loop
            .submit_timeout(
                c,
                &fired as *const Cell<usize> as *mut Cell<usize>,
                |ctx, _c, result| {
                    result.expect("timeout should succeed");
                    let fired = unsafe { &*ctx };
                    fired.set(fired.get() + 1);
                },
                deadline,
            )
            .unwrap();
    }

    let start = Instant::now();
    for _ in 0..OPS {
        event_loop.run().unwrap();
    }
    let elapsed = start.elapsed();

    assert_eq!(fired.get(), OPS);
    let per_op = elapsed / OPS as u32;
    assert!(
        per_op < Duration::from_micros(100),
        "averaged {per_op:?} per op, expected under 100us"
    );
}
