//! The worker pool itself.

use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

use quern_driver::{
    ConfigError, Connection, ConnectionInfo, ConnectionRole, MAX_STATEMENT_PARAMETERS,
    PreparedStatement, ResultSet, StatementIndex, StatementMeta, Transaction,
    format_server_version,
};

use crate::callback::{HolderCallback, QueryCallback, TransactionCallback};
use crate::error::{OpenError, PrepareError};
use crate::holder::QueryHolder;
use crate::operation::Operation;
use crate::queue::TaskQueue;
use crate::result::result_cell;
use crate::worker::Worker;

/// How many times a direct transaction commit is retried after a
/// deadlock-class failure, on top of the initial attempt.
pub const DEADLOCK_RETRIES: u8 = 5;

/// Tunables for a [`WorkerPool`], all optional.
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    sync_acquire_timeout: Option<Duration>,
    warn_sync_queries: bool,
}

impl PoolOptions {
    /// Default options: block forever waiting for a free synchronous
    /// connection, and do not log blocking calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up acquiring a synchronous connection after `timeout`,
    /// failing the blocking call with an error log instead of waiting
    /// forever.
    #[must_use]
    pub fn sync_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.sync_acquire_timeout = Some(timeout);
        self
    }

    /// Log every blocking call with its call site, to hunt down
    /// synchronous queries issued from latency-sensitive threads.
    #[must_use]
    pub fn warn_sync_queries(mut self, enabled: bool) -> Self {
        self.warn_sync_queries = enabled;
        self
    }
}

/// A pool of persistent connections to one database, split into a
/// synchronous side and an asynchronous side.
///
/// Synchronous connections are locked ad hoc by caller threads for
/// blocking calls. Asynchronous connections are each owned by a
/// dedicated worker thread draining a single shared task queue, so
/// deferred operations run in submission order relative to the worker
/// that picks them up.
///
/// ## Lifecycle
///
/// A pool is configured with [`set_connection_info`], opened with
/// [`open`], optionally primed with [`prepare_statements`], used, and
/// torn down with [`close`] (or by dropping it). Opening and preparing
/// are all-or-nothing; a failure leaves the pool closed.
///
/// ## Example
///
/// ```rust,ignore
/// let mut pool: WorkerPool<MyConnection> = WorkerPool::new();
/// pool.set_connection_info("host=localhost;user=world;database=characters", 2, 1)?;
/// pool.open()?;
/// pool.prepare_statements()?;
///
/// pool.execute("UPDATE characters SET online = 0");
/// let row_count = pool
///     .query("SELECT COUNT(*) FROM characters")
///     .and_then(|rows| rows.first()?.get::<u64>(0).ok());
/// ```
///
/// [`set_connection_info`]: WorkerPool::set_connection_info
/// [`open`]: WorkerPool::open
/// [`prepare_statements`]: WorkerPool::prepare_statements
/// [`close`]: WorkerPool::close
pub struct WorkerPool<T: Connection> {
    connection_info: Option<ConnectionInfo>,
    options: PoolOptions,
    async_count: u8,
    sync_count: u8,
    queue: Arc<TaskQueue<Operation>>,
    sync_connections: Vec<Mutex<T>>,
    async_connections: Vec<Arc<Mutex<T>>>,
    workers: Vec<Worker>,
    statement_params: Vec<Option<u8>>,
    sync_cursor: AtomicUsize,
}

impl<T: Connection> WorkerPool<T> {
    /// Create a closed pool with default [`PoolOptions`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(PoolOptions::default())
    }

    /// Create a closed pool with the given options.
    #[must_use]
    pub fn with_options(options: PoolOptions) -> Self {
        Self {
            connection_info: None,
            options,
            async_count: 0,
            sync_count: 0,
            queue: Arc::new(TaskQueue::new()),
            sync_connections: Vec::new(),
            async_connections: Vec::new(),
            workers: Vec::new(),
            statement_params: Vec::new(),
            sync_cursor: AtomicUsize::new(0),
        }
    }

    /// Parse and store the connection string and the number of
    /// connections to open per side. Must be called before [`open`].
    ///
    /// [`open`]: WorkerPool::open
    pub fn set_connection_info(
        &mut self,
        connection_string: &str,
        async_connections: u8,
        sync_connections: u8,
    ) -> Result<(), ConfigError> {
        self.connection_info = Some(ConnectionInfo::from_connection_string(connection_string)?);
        self.async_count = async_connections;
        self.sync_count = sync_connections;
        Ok(())
    }

    /// Open every connection and start the worker threads.
    ///
    /// The asynchronous batch opens first, then the synchronous batch.
    /// Any failure (connect error, server below
    /// [`MIN_SERVER_VERSION`](Connection::MIN_SERVER_VERSION), worker
    /// spawn error) discards all connections opened so far and returns
    /// the error; the pool can then be reconfigured and opened again.
    ///
    /// # Panics
    ///
    /// Panics when called before [`set_connection_info`]; opening an
    /// unconfigured pool is a programmer error.
    ///
    /// [`set_connection_info`]: WorkerPool::set_connection_info
    #[allow(clippy::panic)]
    pub fn open(&mut self) -> Result<(), OpenError> {
        let Some(info) = self.connection_info.clone() else {
            panic!("connection info was not set before opening the pool");
        };
        // Reopening tears down any previous connections and workers.
        self.close();

        info!(
            database = info.database,
            async_connections = self.async_count,
            sync_connections = self.sync_count,
            "opening database worker pool"
        );

        // An early return drops any batch opened so far, closing those
        // connections before they ever become visible.
        let async_batch = open_batch::<T>(&info, ConnectionRole::Asynchronous, self.async_count)?;
        let sync_batch = open_batch::<T>(&info, ConnectionRole::Synchronous, self.sync_count)?;

        self.async_connections = async_batch.into_iter().map(Mutex::new).map(Arc::new).collect();
        self.sync_connections = sync_batch.into_iter().map(Mutex::new).collect();
        self.queue = Arc::new(TaskQueue::new());
        self.sync_cursor = AtomicUsize::new(0);

        for index in 0..self.async_connections.len() {
            let worker = Worker::spawn(
                index,
                Arc::clone(&self.queue),
                Arc::clone(&self.async_connections[index]),
            );
            match worker {
                Ok(worker) => self.workers.push(worker),
                Err(err) => {
                    self.close();
                    return Err(OpenError::WorkerSpawn { source: err });
                }
            }
        }

        info!(
            database = self.database_name(),
            "database worker pool opened"
        );
        Ok(())
    }

    /// Compile the statement catalogue on every connection and build the
    /// shared descriptor table.
    ///
    /// Each connection compiles the entries matching its role and reports
    /// parameter counts; the table records the first count seen per index
    /// and logs disagreements. On any driver failure the pool closes and
    /// the error is returned.
    ///
    /// # Panics
    ///
    /// Panics when a connection reports
    /// [`MAX_STATEMENT_PARAMETERS`] or more parameters for an entry; such
    /// a catalogue cannot be represented and is a driver bug.
    pub fn prepare_statements(&mut self) -> Result<(), PrepareError> {
        match self.prepare_all_connections() {
            Ok(table) => {
                debug!(
                    database = self.database_name(),
                    statements = table.iter().filter(|slot| slot.is_some()).count(),
                    "prepared statement catalogue ready"
                );
                self.statement_params = table;
                Ok(())
            }
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn prepare_all_connections(&self) -> Result<Vec<Option<u8>>, PrepareError> {
        let mut table: Vec<Option<u8>> = Vec::new();

        for connection in &self.sync_connections {
            let metas = connection.lock().prepare_statements().map_err(|source| {
                PrepareError::Driver {
                    role: ConnectionRole::Synchronous,
                    source,
                }
            })?;
            merge_statement_metas(&mut table, &metas);
        }
        for connection in &self.async_connections {
            let metas = connection.lock().prepare_statements().map_err(|source| {
                PrepareError::Driver {
                    role: ConnectionRole::Asynchronous,
                    source,
                }
            })?;
            merge_statement_metas(&mut table, &metas);
        }

        Ok(table)
    }

    /// Stop the workers and drop every connection.
    ///
    /// The task queue is cancelled first, which drops undelivered
    /// operations (resolving their pending results as cancelled) and
    /// lets each worker finish the operation it is executing before it
    /// exits. Asynchronous connections are released before synchronous
    /// ones. Blocking callers already inside a synchronous call finish
    /// normally. Closing an unopened pool is a no-op.
    pub fn close(&mut self) {
        if self.sync_connections.is_empty() && self.async_connections.is_empty() {
            return;
        }

        info!(database = self.database_name(), "closing database worker pool");
        self.queue.cancel();
        for worker in self.workers.drain(..) {
            worker.join();
        }
        self.async_connections.clear();
        info!(
            database = self.database_name(),
            "asynchronous connections closed"
        );
        self.sync_connections.clear();
        info!(
            database = self.database_name(),
            "synchronous connections closed"
        );
    }

    /// Blocking query with raw SQL. `None` means zero rows or failure.
    #[track_caller]
    pub fn query(&self, sql: &str) -> Option<ResultSet> {
        let mut connection = self.free_connection()?;
        connection.query(sql)
    }

    /// Blocking query with a bound prepared statement. `None` means zero
    /// rows or failure.
    #[track_caller]
    pub fn query_prepared(&self, stmt: PreparedStatement) -> Option<ResultSet> {
        let mut connection = self.free_connection()?;
        connection.query_prepared(&stmt)
    }

    /// Blocking fire-and-forget execution of raw SQL. Returns whether
    /// the server accepted the statement; `false` also covers failing to
    /// acquire a connection within the configured timeout.
    #[track_caller]
    pub fn direct_execute(&self, sql: &str) -> bool {
        if sql.is_empty() {
            return false;
        }
        let Some(mut connection) = self.free_connection() else {
            return false;
        };
        connection.execute(sql)
    }

    /// Blocking fire-and-forget execution of a bound prepared statement.
    #[track_caller]
    pub fn direct_execute_prepared(&self, stmt: PreparedStatement) -> bool {
        let Some(mut connection) = self.free_connection() else {
            return false;
        };
        connection.execute_prepared(&stmt)
    }

    /// Enqueue raw SQL for deferred execution. Empty statements are
    /// ignored.
    pub fn execute(&self, sql: impl Into<String>) {
        let sql = sql.into();
        if sql.is_empty() {
            return;
        }
        self.queue.push(Operation::RawStatement { sql, result: None });
    }

    /// Enqueue a bound prepared statement for deferred execution.
    pub fn execute_prepared(&self, stmt: PreparedStatement) {
        self.queue.push(Operation::PreparedStatement { stmt, result: None });
    }

    /// Enqueue a raw query and get a callback for its result.
    pub fn async_query(&self, sql: impl Into<String>) -> QueryCallback {
        let (promise, pending) = result_cell();
        self.queue.push(Operation::RawStatement {
            sql: sql.into(),
            result: Some(promise),
        });
        QueryCallback::new(pending)
    }

    /// Enqueue a bound prepared statement as a query and get a callback
    /// for its result.
    pub fn async_query_prepared(&self, stmt: PreparedStatement) -> QueryCallback {
        let (promise, pending) = result_cell();
        self.queue.push(Operation::PreparedStatement {
            stmt,
            result: Some(promise),
        });
        QueryCallback::new(pending)
    }

    /// Enqueue a query holder; every slot runs back to back on one
    /// worker and the filled holder comes back through the callback.
    pub fn delay_query_holder(&self, holder: QueryHolder) -> HolderCallback {
        let (promise, pending) = result_cell();
        self.queue.push(Operation::QueryHolder {
            holder,
            result: promise,
        });
        HolderCallback::new(pending)
    }

    /// Start an empty transaction batch for this pool.
    #[must_use]
    pub fn begin_transaction(&self) -> Transaction {
        Transaction::new()
    }

    /// Enqueue a transaction batch for deferred atomic execution.
    ///
    /// Empty batches are skipped with a debug log. A batch that was
    /// already committed once is rejected with an error log.
    pub fn commit_transaction(&self, transaction: Transaction) {
        if transaction.is_empty() {
            debug!("skipping commit of an empty transaction");
            return;
        }
        if transaction.len() == 1 {
            debug!("single-statement transaction; a plain execute would avoid the overhead");
        }
        if !transaction.mark_submitted() {
            error!("transaction was already committed once; dropped");
            return;
        }
        self.queue.push(Operation::Transaction { transaction });
    }

    /// Enqueue a transaction batch and get a callback reporting whether
    /// the commit succeeded.
    ///
    /// An empty batch resolves `true` immediately without touching any
    /// connection; a repeated commit resolves `false`.
    pub fn async_commit_transaction(&self, transaction: Transaction) -> TransactionCallback {
        let (promise, pending) = result_cell();
        if transaction.is_empty() {
            debug!("skipping commit of an empty transaction");
            promise.resolve(true);
            return TransactionCallback::new(pending);
        }
        if !transaction.mark_submitted() {
            error!("transaction was already committed once; dropped");
            promise.resolve(false);
            return TransactionCallback::new(pending);
        }
        self.queue.push(Operation::TransactionWithResult {
            transaction,
            result: promise,
        });
        TransactionCallback::new(pending)
    }

    /// Commit a transaction batch on a synchronous connection, blocking
    /// until it lands.
    ///
    /// Deadlock-class failures are retried up to [`DEADLOCK_RETRIES`]
    /// times on the same connection; any other failure, or exhausting
    /// the retries, discards the batch.
    #[track_caller]
    pub fn direct_commit_transaction(&self, transaction: Transaction) {
        if transaction.is_empty() {
            debug!("skipping commit of an empty transaction");
            return;
        }
        if transaction.len() == 1 {
            debug!("single-statement transaction; a plain execute would avoid the overhead");
        }
        if !transaction.mark_submitted() {
            error!("transaction was already committed once; dropped");
            return;
        }

        let Some(mut connection) = self.free_connection() else {
            transaction.cleanup();
            return;
        };

        let mut outcome = connection.execute_transaction(&transaction);
        if matches!(&outcome, Err(err) if err.is_deadlock()) {
            for attempt in 1..=DEADLOCK_RETRIES {
                warn!(
                    attempt,
                    retries = DEADLOCK_RETRIES,
                    "deadlocked transaction, retrying"
                );
                outcome = connection.execute_transaction(&transaction);
                match &outcome {
                    Ok(()) => break,
                    Err(err) if err.is_deadlock() => {}
                    Err(_) => break,
                }
            }
        }

        if let Err(err) = outcome {
            error!(
                code = err.code(),
                error = %err,
                statements = transaction.len(),
                "transaction failed, rolled back"
            );
            transaction.cleanup();
        }
    }

    /// Build a bindable proxy for catalogue entry `index`, sized from
    /// the descriptor table.
    ///
    /// # Panics
    ///
    /// Panics when `index` is not in the descriptor table, which means
    /// [`prepare_statements`](WorkerPool::prepare_statements) never ran
    /// or the driver's catalogue does not contain the entry. Executing
    /// such a statement could only fail later and further from the bug.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn get_prepared_statement(&self, index: StatementIndex) -> PreparedStatement {
        let slot = index.0 as usize;
        match self.statement_params.get(slot).copied().flatten() {
            Some(params) => PreparedStatement::new(index, params),
            None => panic!("statement {index} is not in the prepared statement table"),
        }
    }

    /// Append raw SQL to `transaction` when one is given, otherwise
    /// enqueue it for deferred execution.
    pub fn execute_or_append(&self, transaction: Option<&Transaction>, sql: impl Into<String>) {
        match transaction {
            Some(transaction) => transaction.append(sql),
            None => self.execute(sql),
        }
    }

    /// Append a bound prepared statement to `transaction` when one is
    /// given, otherwise enqueue it for deferred execution.
    pub fn execute_or_append_prepared(
        &self,
        transaction: Option<&Transaction>,
        stmt: PreparedStatement,
    ) {
        match transaction {
            Some(transaction) => transaction.append_prepared(stmt),
            None => self.execute_prepared(stmt),
        }
    }

    /// Escape `input` in place for safe embedding in a statement string,
    /// using a synchronous connection's escaping rules.
    #[track_caller]
    pub fn escape_string(&self, input: &mut String) {
        if input.is_empty() {
            return;
        }
        if let Some(mut connection) = self.free_connection() {
            *input = connection.escape_string(input);
        }
    }

    /// Keep idle connections alive.
    ///
    /// Pings every synchronous connection that is not currently in use
    /// (a held lock means the connection is not idle) and enqueues one
    /// ping per asynchronous connection. Call this periodically, e.g.
    /// once a minute, from a maintenance timer.
    pub fn keep_alive(&self) {
        for connection in &self.sync_connections {
            if let Some(mut connection) = connection.try_lock() {
                trace!("pinging idle synchronous connection");
                connection.ping();
            }
        }
        // Each worker drains the queue greedily, so one ping per worker
        // reaches every asynchronous connection only approximately; idle
        // workers pick them up, busy workers are alive by definition.
        for _ in &self.async_connections {
            self.queue.push(Operation::Ping);
        }
        debug!(
            database = self.database_name(),
            async_pings = self.async_connections.len(),
            "keep-alive pass done"
        );
    }

    /// Number of operations waiting in the task queue.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Acquire a free synchronous connection, blocking until one is
    /// available or the configured acquire timeout elapses.
    ///
    /// Scans connections round-robin from a shared cursor so load
    /// spreads across the synchronous side.
    ///
    /// # Panics
    ///
    /// Panics when the pool has no synchronous connections, which means
    /// it was opened with `sync_connections == 0` yet a blocking call
    /// was made; such a call could never complete.
    #[track_caller]
    fn free_connection(&self) -> Option<MutexGuard<'_, T>> {
        if self.options.warn_sync_queries {
            warn!(caller = %Location::caller(), "blocking database call");
        }
        assert!(
            !self.sync_connections.is_empty(),
            "blocking call on a pool with no synchronous connections"
        );

        let deadline = self
            .options
            .sync_acquire_timeout
            .map(|timeout| Instant::now() + timeout);
        loop {
            let slot =
                self.sync_cursor.fetch_add(1, Ordering::Relaxed) % self.sync_connections.len();
            if let Some(guard) = self.sync_connections[slot].try_lock() {
                return Some(guard);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                error!(
                    caller = %Location::caller(),
                    "timed out waiting for a free synchronous connection"
                );
                return None;
            }
            thread::yield_now();
        }
    }

    fn database_name(&self) -> &str {
        self.connection_info
            .as_ref()
            .map_or("", |info| info.database.as_str())
    }
}

impl<T: Connection> Default for WorkerPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Connection> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open one batch of connections, verifying each against the driver's
/// minimum supported server version.
fn open_batch<T: Connection>(
    info: &ConnectionInfo,
    role: ConnectionRole,
    count: u8,
) -> Result<Vec<T>, OpenError> {
    let mut batch = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let connection =
            T::open(info, role).map_err(|source| OpenError::Driver { role, source })?;

        let reported = connection.server_version();
        if reported < T::MIN_SERVER_VERSION {
            error!(
                database = info.database,
                reported = format_server_version(reported),
                minimum = format_server_version(T::MIN_SERVER_VERSION),
                "server version below the supported minimum"
            );
            return Err(OpenError::ServerTooOld {
                reported,
                minimum: T::MIN_SERVER_VERSION,
            });
        }

        debug!(
            database = info.database,
            role = %role,
            server_version = format_server_version(reported),
            "connection established"
        );
        batch.push(connection);
    }
    Ok(batch)
}

/// Record `metas` into the shared descriptor table, first count wins.
///
/// # Panics
///
/// Panics when a reported parameter count is not below
/// [`MAX_STATEMENT_PARAMETERS`].
fn merge_statement_metas(table: &mut Vec<Option<u8>>, metas: &[StatementMeta]) {
    for meta in metas {
        assert!(
            meta.parameter_count < MAX_STATEMENT_PARAMETERS,
            "statement {} declares {} parameters, limit is {}",
            meta.index,
            meta.parameter_count,
            MAX_STATEMENT_PARAMETERS,
        );
        #[allow(clippy::cast_possible_truncation)] // asserted above
        let count = meta.parameter_count as u8;

        let slot = meta.index.0 as usize;
        if table.len() <= slot {
            table.resize(slot + 1, None);
        }
        match table[slot] {
            None => table[slot] = Some(count),
            Some(recorded) if recorded == count => {}
            Some(recorded) => {
                error!(
                    statement = %meta.index,
                    recorded,
                    reported = count,
                    "connections disagree on a statement's parameter count; keeping the first"
                );
            }
        }
    }
}
