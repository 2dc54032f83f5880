//! An intrusive, singly-linked FIFO of [`Completion`]s (§3, §4.B).
//!
//! No node is ever allocated or freed by this module: the link lives inside
//! the completion itself, so `push_back`/`pop_front` are pointer twiddling
//! only. The loop owns two of these (`unqueued`, `completed`); the notifier
//! owns the conceptual third bucket (`waiting`), keyed by fd rather than
//! chained through `Link`.

use std::ptr::NonNull;

use crate::completion::{Completion, Link};

/// A FIFO of completions linked through their own [`Link`] field.
///
/// # Safety
///
/// Every `NonNull<Completion>` pushed here must stay valid (the caller must
/// not free or move the completion) until it is popped back out, either by
/// `pop_front` or `remove`.
pub(crate) struct Fifo {
    head: Option<NonNull<Completion>>,
    tail: Option<NonNull<Completion>>,
    len: usize,
}

impl Fifo {
    pub(crate) fn new() -> Fifo {
        Fifo {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends `c` in O(1). `c` must not currently be linked anywhere.
    pub(crate) fn push_back(&mut self, c: NonNull<Completion>) {
        debug_assert!(
            !unsafe { c.as_ref() }.is_linked(),
            "pushing an already-linked completion corrupts the queue it came from"
        );

        unsafe { *c.as_ref().link.get() = Link::Linked { next: None } };

        match self.tail {
            Some(tail) => unsafe {
                *tail.as_ref().link.get() = Link::Linked { next: Some(c) };
            },
            None => self.head = Some(c),
        }
        self.tail = Some(c);
        self.len += 1;
    }

    /// Removes and returns the front of the queue in O(1), leaving it
    /// `Unlinked`.
    pub(crate) fn pop_front(&mut self) -> Option<NonNull<Completion>> {
        let head = self.head?;
        let next = match unsafe { *head.as_ref().link.get() } {
            Link::Linked { next } => next,
            _ => None,
        };

        self.head = next;
        if self.head.is_none() {
            self.tail = None;
        }
        unsafe { *head.as_ref().link.get() = Link::Unlinked };
        self.len -= 1;
        Some(head)
    }

    pub(crate) fn peek_front(&self) -> Option<NonNull<Completion>> {
        self.head
    }

    /// Removes `target` from wherever it sits in the queue, in O(n).
    /// Reserved for cancellation paths (§5); the hot path never calls this.
    #[allow(dead_code)]
    pub(crate) fn remove(&mut self, target: NonNull<Completion>) -> bool {
        let mut prev: Option<NonNull<Completion>> = None;
        let mut cur = self.head;

        while let Some(node) = cur {
            let next = match unsafe { *node.as_ref().link.get() } {
                Link::Linked { next } => next,
                _ => None,
            };

            if node == target {
                match prev {
                    Some(prev) => unsafe {
                        *prev.as_ref().link.get() = Link::Linked { next };
                    },
                    None => self.head = next,
                }
                if self.tail == Some(node) {
                    self.tail = prev;
                }
                unsafe { *node.as_ref().link.get() = Link::Unlinked };
                self.len -= 1;
                return true;
            }

            prev = cur;
            cur = next;
        }

        false
    }
}
