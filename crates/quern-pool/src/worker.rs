//! Worker threads draining the shared task queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use quern_driver::Connection;

use crate::operation::Operation;
use crate::queue::TaskQueue;

/// A dedicated thread executing queued operations on one connection.
///
/// The worker owns no connection state itself; it shares the connection
/// slot with the pool so the pool can drop connections after workers
/// have been joined.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn worker `id`, draining `queue` onto `connection` until the
    /// queue is cancelled.
    pub(crate) fn spawn<T: Connection>(
        id: usize,
        queue: Arc<TaskQueue<Operation>>,
        connection: Arc<Mutex<T>>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("quern-db-{id}"))
            .spawn(move || {
                debug!(worker = id, "database worker started");
                while let Some(operation) = queue.pop() {
                    trace!(worker = id, kind = operation.kind(), "executing operation");
                    let mut connection = connection.lock();
                    operation.run_on(&mut *connection);
                }
                debug!(worker = id, "database worker stopped");
            })?;
        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Wait for the worker thread to exit. Call only after the queue
    /// has been cancelled, otherwise this blocks forever.
    pub(crate) fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.id, "database worker panicked");
            }
        }
    }
}
