//! The blocking task queue feeding the asynchronous connections.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// An unbounded, blocking multi-producer/multi-consumer FIFO queue.
///
/// [`push`](TaskQueue::push) never blocks; [`pop`](TaskQueue::pop) blocks
/// the calling thread until an item arrives or the queue is cancelled.
/// Every pushed item is delivered to exactly one consumer or discarded by
/// [`cancel`](TaskQueue::cancel), never both.
///
/// Cancellation is terminal: it wakes every blocked consumer, drops all
/// undelivered items, and makes subsequent pops return `None` immediately.
/// Items pushed after cancellation are dropped on the spot.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                cancelled: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append `item` and wake one blocked consumer. Never blocks.
    ///
    /// On a cancelled queue the item is dropped instead; undelivered work
    /// after cancellation is a defined terminal state, not an error.
    pub fn push(&self, item: T) {
        let rejected = {
            let mut state = self.state.lock();
            if state.cancelled {
                Some(item)
            } else {
                state.items.push_back(item);
                self.available.notify_one();
                None
            }
        };

        // Dropped outside the lock; the item's drop handler may take other
        // locks (result cells resolve themselves as cancelled).
        if rejected.is_some() {
            tracing::debug!("task pushed after queue cancellation, dropping it");
        }
    }

    /// Block until an item is available and take it.
    ///
    /// Returns `None` once the queue has been cancelled; consumers use
    /// that as their signal to shut down.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    /// Cancel the queue, waking every blocked consumer.
    ///
    /// Undelivered items are dropped. The queue stays cancelled forever;
    /// there is no way to revive it.
    pub fn cancel(&self) {
        let dropped = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            self.available.notify_all();
            std::mem::take(&mut state.items)
        };

        if !dropped.is_empty() {
            tracing::debug!(
                undelivered = dropped.len(),
                "task queue cancelled with undelivered tasks"
            );
        }
    }

    /// Number of items currently waiting for a consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Whether the queue has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
