//! # quern-pool
//!
//! A database worker pool multiplexing blocking and deferred work over
//! persistent connections.
//!
//! [`WorkerPool`] owns two sets of connections to one database. The
//! synchronous set serves blocking calls ([`query`], [`direct_execute`],
//! [`direct_commit_transaction`]) made from any thread; a free connection
//! is picked round-robin and locked for the duration of the call. The
//! asynchronous set is driven by dedicated worker threads draining one
//! shared FIFO [`TaskQueue`]; deferred calls ([`execute`],
//! [`async_query`], [`commit_transaction`]) enqueue an [`Operation`] and
//! return immediately, handing back a callback when there is a result to
//! deliver.
//!
//! ## Design
//!
//! The pool is generic over [`Connection`](quern_driver::Connection) and
//! contains no driver-specific logic: version gating, the prepared
//! statement descriptor table, deadlock retries and keep-alive all work
//! purely in terms of the driver contract. Results cross threads through
//! single-use promise/pending pairs ([`result_cell`]); dropping the pool
//! cancels undelivered work, and cancelled results never invoke
//! continuations.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut pool: WorkerPool<MyConnection> = WorkerPool::new();
//! pool.set_connection_info("host=localhost;user=world;database=characters", 2, 1)?;
//! pool.open()?;
//! pool.prepare_statements()?;
//!
//! // Deferred, ordered with respect to other deferred work:
//! let trans = pool.begin_transaction();
//! trans.append("DELETE FROM corpse WHERE expired = 1");
//! pool.commit_transaction(trans);
//!
//! // Blocking:
//! if let Some(rows) = pool.query("SELECT id, name FROM realms") {
//!     for row in rows.rows() {
//!         println!("{:?}", row.get_by_name::<String>("name"));
//!     }
//! }
//! ```
//!
//! [`query`]: WorkerPool::query
//! [`direct_execute`]: WorkerPool::direct_execute
//! [`direct_commit_transaction`]: WorkerPool::direct_commit_transaction
//! [`execute`]: WorkerPool::execute
//! [`async_query`]: WorkerPool::async_query
//! [`commit_transaction`]: WorkerPool::commit_transaction

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod callback;
pub mod error;
pub mod holder;
pub mod operation;
pub mod pool;
pub mod queue;
pub mod result;
mod worker;

pub use callback::{
    AsyncCallback, CallbackProcessor, HolderCallback, QueryCallback, TransactionCallback,
};
pub use error::{OpenError, PrepareError};
pub use holder::QueryHolder;
pub use operation::Operation;
pub use pool::{DEADLOCK_RETRIES, PoolOptions, WorkerPool};
pub use queue::TaskQueue;
pub use result::{Completion, PendingResult, Promise, result_cell};
