//! Bounded multi-producer/single-consumer queue between producers and a
//! sink worker.
//!
//! Producers never wait for space: when the queue is full the oldest entry
//! is displaced (drop-oldest) and handed back to the caller for counting.
//! The only lock is the short critical section around the `VecDeque`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::{watch, Notify};

/// Result of a [`DispatchQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// Accepted with room to spare.
    Queued,
    /// Accepted; this older entry was evicted to make room.
    Displaced(T),
    /// The queue is closed; the item was not accepted.
    Rejected(T),
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct DispatchQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    deadline: watch::Sender<Option<Instant>>,
    capacity: usize,
    priority: Option<fn(&T) -> bool>,
}

impl<T> DispatchQueue<T> {
    /// FIFO queue holding at most `capacity` entries (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DispatchQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            deadline: watch::channel(None).0,
            capacity,
            priority: None,
        }
    }

    /// Like [`new`](Self::new), but on overflow entries for which
    /// `is_priority` returns true are evicted last.
    pub fn with_priority(capacity: usize, is_priority: fn(&T) -> bool) -> Self {
        DispatchQueue {
            priority: Some(is_priority),
            ..Self::new(capacity)
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, item: T) -> PushOutcome<T> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PushOutcome::Rejected(item);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                PushOutcome::Queued
            } else {
                match self.evict(&mut inner.items, &item) {
                    Some(index) => {
                        let evicted = inner.items.remove(index);
                        inner.items.push_back(item);
                        match evicted {
                            Some(evicted) => PushOutcome::Displaced(evicted),
                            None => PushOutcome::Queued,
                        }
                    }
                    // Everything queued outranks the newcomer.
                    None => PushOutcome::Displaced(item),
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    // Index of the entry to evict, or None to drop the incoming item.
    fn evict(&self, items: &VecDeque<T>, incoming: &T) -> Option<usize> {
        let Some(is_priority) = self.priority else {
            return Some(0);
        };
        match items.iter().position(|queued| !is_priority(queued)) {
            Some(index) => Some(index),
            None if is_priority(incoming) => Some(0),
            None => None,
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Wait until something is pushed or the queue is closed.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Stop accepting items. Already queued entries stay for the consumer,
    /// which should give up on them once `deadline` has passed.
    pub fn close(&self, deadline: Instant) {
        self.inner.lock().closed = true;
        self.deadline.send_modify(|current| {
            *current = Some(match *current {
                Some(existing) => existing.min(deadline),
                None => deadline,
            });
        });
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.borrow()
    }

    /// Receiver that observes every change of the close deadline, for
    /// consumers that must abandon in-flight work when it passes.
    pub fn subscribe_deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline.subscribe()
    }

    /// Remove every queued entry, returning how many there were.
    pub fn discard_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.items.len();
        inner.items.clear();
        count
    }
}
