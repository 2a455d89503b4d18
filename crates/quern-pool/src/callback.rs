//! Callback adapters over pending results.
//!
//! The pool's asynchronous entry points return callback wrappers instead
//! of raw pending results, so a consumer can attach continuations and
//! drain completed work on its own update loop instead of blocking.
//! [`QueryCallback`] additionally supports chaining: a continuation can
//! issue the next query and splice its callback into the chain, letting
//! dependent queries run back to back without ever blocking the consumer
//! thread.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut processor = CallbackProcessor::new();
//! processor.add_callback(
//!     pool.async_query("SELECT guid FROM characters WHERE account = 7")
//!         .and_then(|result| {
//!             let guid = result
//!                 .and_then(|rows| rows.first().and_then(|row| row.get::<u64>(0).ok()))
//!                 .unwrap_or(0);
//!             pool.async_query(format!("SELECT name FROM characters WHERE guid = {guid}"))
//!         })
//!         .then(|result| println!("loaded: {result:?}")),
//! );
//!
//! // Somewhere in the consumer's periodic update:
//! processor.process_ready();
//! ```

use std::collections::VecDeque;
use std::fmt;

use quern_driver::ResultSet;

use crate::holder::QueryHolder;
use crate::result::{Completion, PendingResult};

/// Implemented by every callback the [`CallbackProcessor`] can drive.
pub trait AsyncCallback {
    /// Poll once; run any due continuation. `true` means the callback is
    /// finished and can be discarded.
    fn invoke_if_ready(&mut self) -> bool;
}

enum Step {
    /// Terminal consumer of a result.
    Then(Box<dyn FnOnce(Option<ResultSet>) + Send>),
    /// Continuation producing the next callback in the chain.
    AndThen(Box<dyn FnOnce(Option<ResultSet>) -> QueryCallback + Send>),
}

/// The pending result of an asynchronous query, with optional chained
/// continuations.
///
/// Consumed either by blocking ([`wait`](QueryCallback::wait)) or by
/// polling through a [`CallbackProcessor`]. Continuations never run for
/// a cancelled query; cancellation simply completes the callback.
pub struct QueryCallback {
    pending: PendingResult<Option<ResultSet>>,
    steps: VecDeque<Step>,
}

impl QueryCallback {
    pub(crate) fn new(pending: PendingResult<Option<ResultSet>>) -> Self {
        Self {
            pending,
            steps: VecDeque::new(),
        }
    }

    /// Attach a terminal continuation receiving the query's result.
    ///
    /// `then` ends the chain: once it has run, the callback reports
    /// itself finished and any later steps are dropped.
    #[must_use]
    pub fn then(mut self, f: impl FnOnce(Option<ResultSet>) + Send + 'static) -> Self {
        self.steps.push_back(Step::Then(Box::new(f)));
        self
    }

    /// Attach a continuation that issues the next query.
    ///
    /// When the current result arrives, `f` runs on it and the callback
    /// it returns is spliced into this chain, own continuations first.
    #[must_use]
    pub fn and_then(
        mut self,
        f: impl FnOnce(Option<ResultSet>) -> QueryCallback + Send + 'static,
    ) -> Self {
        self.steps.push_back(Step::AndThen(Box::new(f)));
        self
    }

    /// Block until the whole chain has run, returning the final result.
    ///
    /// For a chain ending in [`then`](QueryCallback::then) the final
    /// result was handed to that continuation, so `Ready(None)` comes
    /// back here. A cancellation anywhere in the chain stops it and
    /// returns [`Completion::Cancelled`].
    pub fn wait(self) -> Completion<Option<ResultSet>> {
        let Self {
            mut pending,
            mut steps,
        } = self;
        loop {
            let result = match pending.wait() {
                Completion::Ready(result) => result,
                Completion::Cancelled => return Completion::Cancelled,
            };
            match steps.pop_front() {
                None => return Completion::Ready(result),
                Some(Step::Then(f)) => {
                    f(result);
                    return Completion::Ready(None);
                }
                Some(Step::AndThen(f)) => {
                    let next = f(result);
                    pending = next.pending;
                    for step in next.steps.into_iter().rev() {
                        steps.push_front(step);
                    }
                }
            }
        }
    }
}

impl AsyncCallback for QueryCallback {
    fn invoke_if_ready(&mut self) -> bool {
        let result = match self.pending.poll() {
            None => return false,
            Some(Completion::Cancelled) => {
                self.steps.clear();
                return true;
            }
            Some(Completion::Ready(result)) => result,
        };

        match self.steps.pop_front() {
            None => true,
            Some(Step::Then(f)) => {
                f(result);
                true
            }
            Some(Step::AndThen(f)) => {
                let next = f(result);
                self.pending = next.pending;
                for step in next.steps.into_iter().rev() {
                    self.steps.push_front(step);
                }
                false
            }
        }
    }
}

impl fmt::Debug for QueryCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCallback")
            .field("ready", &self.pending.is_ready())
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// The pending outcome of an asynchronous transaction commit.
pub struct TransactionCallback {
    pending: PendingResult<bool>,
    after: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl TransactionCallback {
    pub(crate) fn new(pending: PendingResult<bool>) -> Self {
        Self {
            pending,
            after: None,
        }
    }

    /// Attach a continuation receiving whether the commit succeeded.
    /// Not invoked when the commit was cancelled before running.
    #[must_use]
    pub fn after_complete(mut self, f: impl FnOnce(bool) + Send + 'static) -> Self {
        self.after = Some(Box::new(f));
        self
    }

    /// Block until the commit has run. `Ready(true)` means it succeeded.
    pub fn wait(self) -> Completion<bool> {
        let completion = self.pending.wait();
        if let (Completion::Ready(ok), Some(f)) = (&completion, self.after) {
            f(*ok);
        }
        completion
    }
}

impl AsyncCallback for TransactionCallback {
    fn invoke_if_ready(&mut self) -> bool {
        match self.pending.poll() {
            None => false,
            Some(Completion::Cancelled) => {
                self.after = None;
                true
            }
            Some(Completion::Ready(ok)) => {
                if let Some(f) = self.after.take() {
                    f(ok);
                }
                true
            }
        }
    }
}

impl fmt::Debug for TransactionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCallback")
            .field("ready", &self.pending.is_ready())
            .finish()
    }
}

/// The pending outcome of a delayed query holder.
///
/// Resolves to the [`QueryHolder`] itself, with its slot results filled
/// in and ready to be taken.
pub struct HolderCallback {
    pending: PendingResult<QueryHolder>,
    after: Option<Box<dyn FnOnce(QueryHolder) + Send>>,
}

impl HolderCallback {
    pub(crate) fn new(pending: PendingResult<QueryHolder>) -> Self {
        Self {
            pending,
            after: None,
        }
    }

    /// Attach a continuation receiving the executed holder.
    /// Not invoked when the holder was cancelled before running.
    #[must_use]
    pub fn after_complete(mut self, f: impl FnOnce(QueryHolder) + Send + 'static) -> Self {
        self.after = Some(Box::new(f));
        self
    }

    /// Block until the holder has been executed and take it back.
    ///
    /// When a continuation was attached it receives the holder instead,
    /// and `Cancelled` is returned here.
    pub fn wait(self) -> Completion<QueryHolder> {
        match (self.pending.wait(), self.after) {
            (Completion::Ready(holder), Some(f)) => {
                f(holder);
                Completion::Cancelled
            }
            (completion, _) => completion,
        }
    }
}

impl AsyncCallback for HolderCallback {
    fn invoke_if_ready(&mut self) -> bool {
        match self.pending.poll() {
            None => false,
            Some(Completion::Cancelled) => {
                self.after = None;
                true
            }
            Some(Completion::Ready(holder)) => {
                if let Some(f) = self.after.take() {
                    f(holder);
                }
                true
            }
        }
    }
}

impl fmt::Debug for HolderCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderCallback")
            .field("ready", &self.pending.is_ready())
            .finish()
    }
}

/// Drains completed callbacks on the consumer's own thread.
///
/// A consumer adds the callbacks it submits and calls
/// [`process_ready`](CallbackProcessor::process_ready) from its update
/// loop; completed callbacks run their continuations and are removed,
/// the rest stay for the next round.
pub struct CallbackProcessor<C: AsyncCallback> {
    callbacks: Vec<C>,
}

impl<C: AsyncCallback> CallbackProcessor<C> {
    /// Create an empty processor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Track `callback` until it completes.
    pub fn add_callback(&mut self, callback: C) {
        self.callbacks.push(callback);
    }

    /// Poll every tracked callback once, running continuations for the
    /// completed ones. Returns how many completed this round.
    pub fn process_ready(&mut self) -> usize {
        let before = self.callbacks.len();
        self.callbacks.retain_mut(|cb| !cb.invoke_if_ready());
        before - self.callbacks.len()
    }

    /// Number of callbacks still in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callbacks are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<C: AsyncCallback> Default for CallbackProcessor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: AsyncCallback> fmt::Debug for CallbackProcessor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackProcessor")
            .field("pending", &self.callbacks.len())
            .finish()
    }
}
