//! Single-assignment result cells behind pending-result handles.
//!
//! Every deferred operation that produces a result carries the producer
//! half of a cell ([`Promise`]); the submitter keeps the consumer half
//! ([`PendingResult`]) and either blocks on it or polls it. The producer
//! resolves exactly once. If the operation is discarded without running
//! (queue cancellation, pool shutdown) the promise resolves the cell to
//! [`Completion::Cancelled`] when it is dropped, so a consumer is never
//! left waiting on a cell nobody will ever fill.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// The terminal state a pending result resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    /// The operation ran and produced this value.
    Ready(T),
    /// The operation was discarded before it could run.
    Cancelled,
}

impl<T> Completion<T> {
    /// The produced value, or `None` when cancelled.
    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Whether the operation produced a value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Whether the operation was discarded before running.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

enum CellState<T> {
    Pending,
    Ready(T),
    Cancelled,
    Taken,
}

struct Cell<T> {
    state: Mutex<CellState<T>>,
    ready: Condvar,
}

impl<T> Cell<T> {
    /// Write a terminal state if the cell is still pending, waking waiters.
    fn fulfill(&self, value: CellState<T>) {
        let mut state = self.state.lock();
        if matches!(*state, CellState::Pending) {
            *state = value;
            self.ready.notify_all();
        }
    }
}

/// Create a connected promise/pending-result pair.
#[must_use]
pub fn result_cell<T>() -> (Promise<T>, PendingResult<T>) {
    let cell = Arc::new(Cell {
        state: Mutex::new(CellState::Pending),
        ready: Condvar::new(),
    });
    (
        Promise {
            cell: Some(Arc::clone(&cell)),
        },
        PendingResult { cell },
    )
}

/// The producer half of a result cell. Resolves exactly once.
///
/// Dropping an unresolved promise resolves the cell to
/// [`Completion::Cancelled`], which is how discarded operations report
/// that they never ran.
pub struct Promise<T> {
    cell: Option<Arc<Cell<T>>>,
}

impl<T> Promise<T> {
    /// Deliver the result, waking any waiting consumer.
    pub fn resolve(mut self, value: T) {
        if let Some(cell) = self.cell.take() {
            cell.fulfill(CellState::Ready(value));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.fulfill(CellState::Cancelled);
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.cell.is_none())
            .finish()
    }
}

/// The consumer half of a result cell.
///
/// Exactly one of [`wait`](PendingResult::wait), a successful
/// [`poll`](PendingResult::poll) or a successful
/// [`wait_timeout`](PendingResult::wait_timeout) takes the value; a cell
/// read again after that behaves as cancelled.
pub struct PendingResult<T> {
    cell: Arc<Cell<T>>,
}

impl<T> PendingResult<T> {
    /// Block until the producer resolves the cell.
    pub fn wait(self) -> Completion<T> {
        let mut state = self.cell.state.lock();
        while matches!(*state, CellState::Pending) {
            self.cell.ready.wait(&mut state);
        }
        Self::take(&mut state)
    }

    /// Block up to `timeout` for the producer. `None` on timeout.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Completion<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        while matches!(*state, CellState::Pending) {
            if self.cell.ready.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
        Some(Self::take(&mut state))
    }

    /// Take the result if the producer has resolved, without blocking.
    pub fn poll(&mut self) -> Option<Completion<T>> {
        let mut state = self.cell.state.lock();
        if matches!(*state, CellState::Pending) {
            return None;
        }
        Some(Self::take(&mut state))
    }

    /// Whether the producer has resolved the cell. Does not take the value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !matches!(*self.cell.state.lock(), CellState::Pending)
    }

    fn take(state: &mut CellState<T>) -> Completion<T> {
        match std::mem::replace(state, CellState::Taken) {
            CellState::Ready(value) => Completion::Ready(value),
            // Pending is excluded by every caller; a value taken earlier
            // is gone for good.
            CellState::Pending | CellState::Cancelled | CellState::Taken => Completion::Cancelled,
        }
    }
}

impl<T> fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("ready", &self.is_ready())
            .finish()
    }
}
