//! The receive queue: a one-slot buffer multiplexed over waiting receivers.
//!
//! At most one decrypted payload is parked at a time. Receivers (blocked
//! `recv` callers and asynchronous subscriptions) queue in arrival order
//! and are satisfied strictly in that order. The queue is pure state: it
//! never touches a channel or a timer itself, it hands the actor
//! [`Delivery`] and [`Expired`] values to execute. That keeps the
//! scheduling logic testable without an executor.
//!
//! The invariant the actor relies on: at any moment either the buffer is
//! empty (and the socket is armed iff someone is waiting) or the queue is
//! empty (and the socket is not armed).

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::ConnectionError;

/// Reply channel of a blocked `recv` caller.
pub(crate) type SyncReply = oneshot::Sender<Result<Vec<u8>, ConnectionError>>;

enum Waiter<I> {
    Sync { reply: SyncReply, deadline: Option<I> },
    Subscription { id: u64, deadline: Option<I> },
}

impl<I: Copy> Waiter<I> {
    fn deadline(&self) -> Option<I> {
        match self {
            Self::Sync { deadline, .. } | Self::Subscription { deadline, .. } => *deadline,
        }
    }
}

/// A payload matched to the receiver at the head of the queue.
pub(crate) enum Delivery {
    /// Answer a blocked `recv` caller.
    Sync { reply: SyncReply, payload: Vec<u8> },
    /// Post the payload to the controller.
    Subscription { payload: Vec<u8> },
}

/// A receiver whose deadline passed.
pub(crate) enum Expired {
    /// Tell the blocked caller it timed out.
    Sync { reply: SyncReply },
    /// Tell the controller the subscription timed out.
    Subscription { id: u64 },
}

/// One-slot buffer plus ordered pending receivers.
pub(crate) struct RecvQueue<I> {
    buffer: Option<Vec<u8>>,
    waiters: VecDeque<Waiter<I>>,
    next_id: u64,
}

impl<I: Copy + Ord> RecvQueue<I> {
    pub(crate) fn new() -> Self {
        Self { buffer: None, waiters: VecDeque::new(), next_id: 1 }
    }

    /// Append a blocked `recv` caller.
    pub(crate) fn push_sync(&mut self, reply: SyncReply, deadline: Option<I>) {
        self.waiters.push_back(Waiter::Sync { reply, deadline });
    }

    /// Append a subscription and return its fresh ref id.
    pub(crate) fn subscribe(&mut self, deadline: Option<I>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.waiters.push_back(Waiter::Subscription { id, deadline });
        id
    }

    /// Remove every subscription with this id. Unknown ids are a no-op.
    pub(crate) fn cancel(&mut self, id: u64) {
        self.waiters.retain(|w| !matches!(w, Waiter::Subscription { id: sid, .. } if *sid == id));
    }

    /// Park a decrypted payload. The caller guarantees the slot is free;
    /// the arming predicate makes a full slot unreachable.
    pub(crate) fn fill(&mut self, payload: Vec<u8>) {
        debug_assert!(self.buffer.is_none(), "receive buffer overrun");
        self.buffer = Some(payload);
    }

    /// True if a payload is parked.
    pub(crate) fn is_buffered(&self) -> bool {
        self.buffer.is_some()
    }

    /// True if the socket should be armed for one more frame.
    pub(crate) fn should_arm(&self) -> bool {
        self.buffer.is_none() && !self.waiters.is_empty()
    }

    /// Match the buffered payload to the head receiver, repeatedly. With a
    /// one-slot buffer this yields at most one delivery per inbound frame,
    /// but the loop keeps the processor honest if that ever changes.
    pub(crate) fn pump(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while !self.waiters.is_empty() {
            let Some(payload) = self.buffer.take() else { break };
            if let Some(waiter) = self.waiters.pop_front() {
                deliveries.push(match waiter {
                    Waiter::Sync { reply, .. } => Delivery::Sync { reply, payload },
                    Waiter::Subscription { .. } => Delivery::Subscription { payload },
                });
            }
        }
        deliveries
    }

    /// Earliest pending deadline, if any.
    pub(crate) fn next_deadline(&self) -> Option<I> {
        self.waiters.iter().filter_map(Waiter::deadline).min()
    }

    /// Remove and return every receiver whose deadline has passed. Each
    /// expiry removes only its own receiver; the rest keep waiting.
    pub(crate) fn expire(&mut self, now: I) -> Vec<Expired> {
        let mut expired = Vec::new();
        let mut keep = VecDeque::with_capacity(self.waiters.len());

        for waiter in self.waiters.drain(..) {
            let due = waiter.deadline().is_some_and(|d| d <= now);
            if !due {
                keep.push_back(waiter);
                continue;
            }
            expired.push(match waiter {
                Waiter::Sync { reply, .. } => Expired::Sync { reply },
                Waiter::Subscription { id, .. } => Expired::Subscription { id },
            });
        }

        self.waiters = keep;
        expired
    }

    /// Tear the queue down: every blocked caller gets its reply channel
    /// back, and the bool reports whether any subscription was pending,
    /// which is the trigger for the single closed notification.
    pub(crate) fn drain(&mut self) -> (Vec<SyncReply>, bool) {
        let mut replies = Vec::new();
        let mut had_subscription = false;

        for waiter in self.waiters.drain(..) {
            match waiter {
                Waiter::Sync { reply, .. } => replies.push(reply),
                Waiter::Subscription { .. } => had_subscription = true,
            }
        }

        self.buffer = None;
        (replies, had_subscription)
    }
}
