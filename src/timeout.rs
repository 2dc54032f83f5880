//! The ordered set of pending `timeout` completions, keyed by absolute
//! monotonic deadline (§3, §4.E).

use std::collections::BTreeMap;
use std::ptr::NonNull;

use crate::completion::{Completion, Op};

/// A `(deadline, insertion sequence)` pair. The sequence number breaks ties
/// between timeouts sharing a deadline so each key in the underlying
/// `BTreeMap` stays unique, and (incidentally) so `drain_expired` returns
/// same-deadline timeouts in submission order — the ordering S7 exercises.
type Key = (u64, u64);

/// An ordered set of pending timeouts with O(log n) insert, O(log n)
/// remove-any, and O(1) peek-earliest.
///
/// Implemented as a `BTreeMap` rather than a binary heap because the spec
/// requires remove-any, not just pop-minimum: a `BinaryHeap` has no
/// efficient way to remove an arbitrary element, while a `BTreeMap` does by
/// construction.
pub(crate) struct TimeoutSet {
    by_deadline: BTreeMap<Key, NonNull<Completion>>,
    next_seq: u64,
}

impl TimeoutSet {
    pub(crate) fn new() -> TimeoutSet {
        TimeoutSet {
            by_deadline: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }

    /// Inserts `c`, already holding a `Timeout` op with its deadline filled
    /// in, stamping it with the next insertion sequence.
    pub(crate) fn insert(&mut self, c: NonNull<Completion>, deadline_ns: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;

        unsafe {
            if let Op::Timeout {
                deadline_ns: d,
                seq: s,
            } = &mut *c.as_ref().op.get()
            {
                *d = deadline_ns;
                *s = seq;
            }
        }

        self.by_deadline.insert((deadline_ns, seq), c);
    }

    /// Removes `c` from the set, e.g. for an explicit `cancel_timeout`
    /// (§5). Returns `true` if it was present.
    pub(crate) fn remove(&mut self, c: NonNull<Completion>) -> bool {
        let key = match unsafe { &*c.as_ref().op.get() } {
            Op::Timeout { deadline_ns, seq } => (*deadline_ns, *seq),
            _ => return false,
        };
        self.by_deadline.remove(&key).is_some()
    }

    pub(crate) fn earliest_deadline(&self) -> Option<u64> {
        self.by_deadline.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Pops every timeout with `deadline_ns <= now`, in deadline then
    /// submission order.
    pub(crate) fn drain_expired(&mut self, now: u64) -> Vec<NonNull<Completion>> {
        let mut expired = Vec::new();
        while let Some((&key, _)) = self.by_deadline.iter().next() {
            if key.0 > now {
                break;
            }
            let (_, c) = self.by_deadline.remove_entry(&key).unwrap();
            expired.push(c);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    fn leak_timeout() -> NonNull<Completion> {
        let c = Completion::new();
        unsafe {
            *c.op.get() = Op::Timeout {
                deadline_ns: 0,
                seq: 0,
            };
        }
        NonNull::from(Box::leak(Box::new(c)))
    }

    #[test]
    fn earliest_deadline_tracks_insertions() {
        let mut set = TimeoutSet::new();
        assert_eq!(set.earliest_deadline(), None);

        let a = leak_timeout();
        let b = leak_timeout();
        set.insert(a, 100);
        set.insert(b, 50);

        assert_eq!(set.earliest_deadline(), Some(50));

        unsafe {
            drop(Box::from_raw(a.as_ptr()));
            drop(Box::from_raw(b.as_ptr()));
        }
    }

    #[test]
    fn drain_expired_is_ordered_by_deadline_then_submission() {
        let mut set = TimeoutSet::new();
        let a = leak_timeout();
        let b = leak_timeout();
        let c = leak_timeout();
        set.insert(a, 0);
        set.insert(b, 0);
        set.insert(c, 10);

        let expired = set.drain_expired(0);
        assert_eq!(expired, vec![a, b]);
        assert!(set.earliest_deadline() == Some(10));

        unsafe {
            drop(Box::from_raw(a.as_ptr()));
            drop(Box::from_raw(b.as_ptr()));
            drop(Box::from_raw(c.as_ptr()));
        }
    }

    #[test]
    fn remove_cancels_a_pending_timeout() {
        let mut set = TimeoutSet::new();
        let a = leak_timeout();
        set.insert(a, 5);
        assert!(set.remove(a));
        assert!(set.is_empty());
        unsafe { drop(Box::from_raw(a.as_ptr())) };
    }
}
