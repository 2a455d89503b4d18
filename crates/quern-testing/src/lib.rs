//! # quern-testing
//!
//! Scripted in-memory connections for exercising `quern-pool` without a
//! database server.
//!
//! A test registers a [`script`] under a unique database name and points
//! a [`ScriptedPool`] at it via an ordinary connection string. Every
//! connection the pool opens against that name shares the script's
//! state: a journal of everything that happened, counters, and the
//! failure knobs configured through [`ScriptOptions`]. Queries echo
//! their SQL back together with the id of the connection that served
//! them, which is how tests observe routing.
//!
//! ```rust,ignore
//! let script = script("my_test_db", ScriptOptions::new());
//! let mut pool = ScriptedPool::new();
//! pool.set_connection_info(&script.connection_string(), 1, 1)?;
//! pool.open()?;
//!
//! pool.execute("DELETE FROM corpse");
//! assert!(eventually(Duration::from_secs(1), || {
//!     script.executed_sql().contains(&"DELETE FROM corpse".to_string())
//! }));
//! ```

// A test harness should fail loudly; panicking helpers are the point.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use quern_driver::{
    Connection, ConnectionInfo, ConnectionRole, DriverError, ErrorKind, PreparedStatement,
    ResultSet, SqlValue, StatementDef, StatementIndex, StatementMeta, StatementUse, Transaction,
};
use quern_pool::WorkerPool;

/// A worker pool over scripted connections.
pub type ScriptedPool = WorkerPool<ScriptedConnection>;

/// Server version reported by default: 8.0.36.
pub const MODERN_SERVER: u32 = 80036;

/// A server version below the supported minimum: 5.6.51.
pub const ANCIENT_SERVER: u32 = 50651;

/// The statement catalogue every scripted connection compiles.
///
/// Parameter counts are derived from the `?` placeholders, the same way
/// a real server would report them.
pub const TEST_CATALOGUE: &[StatementDef] = &[
    StatementDef::new(
        0,
        "SELECT name, level FROM characters WHERE guid = ?",
        StatementUse::Both,
    ),
    StatementDef::new(
        1,
        "INSERT INTO character_inventory (guid, bag, slot, item, count) VALUES (?, ?, ?, ?, ?)",
        StatementUse::Async,
    ),
    StatementDef::new(2, "DELETE FROM corpse WHERE guid = ?", StatementUse::Sync),
    StatementDef::new(
        3,
        "UPDATE account SET online = ? WHERE id = ?",
        StatementUse::Both,
    ),
];

static SCRIPTS: Mutex<BTreeMap<String, Arc<ScriptState>>> = Mutex::new(BTreeMap::new());

/// Everything a scripted backend should be told to do, all optional.
///
/// Connection ordinals referenced by the knobs count every open against
/// the script, in order, starting at zero.
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    server_version: Option<u32>,
    fail_open_at: Option<u32>,
    old_server_from: Option<u32>,
    empty_queries: Vec<String>,
    query_delay: Option<Duration>,
    deadlock_commits: u32,
    reject_commits: bool,
    fail_prepare: bool,
    misreport_async: Vec<(u32, u32)>,
}

impl ScriptOptions {
    /// Default behavior: every operation succeeds, queries echo, the
    /// server reports [`MODERN_SERVER`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `version` from every connection's handshake.
    #[must_use]
    pub fn server_version(mut self, version: u32) -> Self {
        self.server_version = Some(version);
        self
    }

    /// Fail the open of connection `ordinal` with a connection error.
    #[must_use]
    pub fn fail_open_at(mut self, ordinal: u32) -> Self {
        self.fail_open_at = Some(ordinal);
        self
    }

    /// Connections from `ordinal` on report [`ANCIENT_SERVER`].
    #[must_use]
    pub fn old_server_from(mut self, ordinal: u32) -> Self {
        self.old_server_from = Some(ordinal);
        self
    }

    /// Make queries for exactly `sql` return no result set.
    #[must_use]
    pub fn empty_query(mut self, sql: impl Into<String>) -> Self {
        self.empty_queries.push(sql.into());
        self
    }

    /// Sleep for `delay` inside every query, holding the connection.
    #[must_use]
    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Fail the first `count` transaction commits with a deadlock.
    #[must_use]
    pub fn deadlock_first(mut self, count: u32) -> Self {
        self.deadlock_commits = count;
        self
    }

    /// Fail every transaction commit with a deadlock.
    #[must_use]
    pub fn deadlock_always(self) -> Self {
        self.deadlock_first(u32::MAX)
    }

    /// Fail every transaction commit with a non-retryable rejection.
    #[must_use]
    pub fn reject_commits(mut self) -> Self {
        self.reject_commits = true;
        self
    }

    /// Fail statement preparation on every connection.
    #[must_use]
    pub fn fail_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// Make asynchronous connections report `parameter_count` for
    /// catalogue entry `index`, disagreeing with the synchronous side.
    #[must_use]
    pub fn misreport_async(mut self, index: u32, parameter_count: u32) -> Self {
        self.misreport_async.push((index, parameter_count));
        self
    }
}

/// One observable event on a scripted backend, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    /// A connection was opened.
    Opened {
        /// Connection ordinal.
        id: u32,
        /// Which side of the pool it serves.
        role: ConnectionRole,
    },
    /// A connection was dropped.
    Closed {
        /// Connection ordinal.
        id: u32,
    },
    /// A connection was pinged.
    Ping {
        /// Connection ordinal.
        id: u32,
    },
    /// Raw SQL was executed.
    Execute {
        /// Connection ordinal.
        id: u32,
        /// The statement text.
        sql: String,
    },
    /// A prepared statement was executed.
    ExecutePrepared {
        /// Connection ordinal.
        id: u32,
        /// Catalogue index of the statement.
        index: StatementIndex,
    },
    /// A raw query ran.
    Query {
        /// Connection ordinal.
        id: u32,
        /// The query text.
        sql: String,
    },
    /// A prepared query ran.
    QueryPrepared {
        /// Connection ordinal.
        id: u32,
        /// Catalogue index of the statement.
        index: StatementIndex,
    },
    /// A transaction commit was attempted.
    Transaction {
        /// Connection ordinal.
        id: u32,
        /// Number of statements in the batch.
        statements: usize,
    },
    /// The statement catalogue was compiled.
    Prepare {
        /// Connection ordinal.
        id: u32,
        /// Role the catalogue was filtered for.
        role: ConnectionRole,
    },
    /// A string was escaped.
    Escape {
        /// Connection ordinal.
        id: u32,
    },
}

#[derive(Debug)]
struct ScriptState {
    options: ScriptOptions,
    opens: AtomicU32,
    transaction_attempts: AtomicU32,
    journal: Mutex<Vec<JournalEvent>>,
}

impl ScriptState {
    fn record(&self, event: JournalEvent) {
        self.journal.lock().push(event);
    }
}

/// Register a scripted backend under `database` and get its handle.
///
/// Calling [`ScriptedConnection::open`] with a connection string whose
/// `database` matches finds this script. Names are global to the test
/// process; use a distinct one per test.
pub fn script(database: impl Into<String>, options: ScriptOptions) -> ScriptHandle {
    let database = database.into();
    let state = Arc::new(ScriptState {
        options,
        opens: AtomicU32::new(0),
        transaction_attempts: AtomicU32::new(0),
        journal: Mutex::new(Vec::new()),
    });
    SCRIPTS.lock().insert(database.clone(), Arc::clone(&state));
    tracing::debug!(database, "registered scripted backend");
    ScriptHandle { database, state }
}

/// A test's view of one scripted backend.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    database: String,
    state: Arc<ScriptState>,
}

impl ScriptHandle {
    /// A connection string routing to this script.
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!("host=localhost;user=test;database={}", self.database)
    }

    /// Snapshot of everything that happened so far.
    #[must_use]
    pub fn events(&self) -> Vec<JournalEvent> {
        self.state.journal.lock().clone()
    }

    /// Connections opened and not yet dropped.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        let journal = self.state.journal.lock();
        let opened = journal
            .iter()
            .filter(|e| matches!(e, JournalEvent::Opened { .. }))
            .count();
        let closed = journal
            .iter()
            .filter(|e| matches!(e, JournalEvent::Closed { .. }))
            .count();
        opened - closed
    }

    /// Total transaction commit attempts, including retries.
    #[must_use]
    pub fn transaction_attempts(&self) -> u32 {
        self.state.transaction_attempts.load(Ordering::SeqCst)
    }

    /// Number of pings received across all connections.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, JournalEvent::Ping { .. }))
            .count()
    }

    /// Number of escape requests received across all connections.
    #[must_use]
    pub fn escape_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, JournalEvent::Escape { .. }))
            .count()
    }

    /// The raw SQL strings executed so far, in order.
    #[must_use]
    pub fn executed_sql(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                JournalEvent::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// The raw query strings run so far, in order.
    #[must_use]
    pub fn queried_sql(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                JournalEvent::Query { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }
}

/// An in-memory connection driven by a registered script.
///
/// Queries echo: the result set has an `echo` column holding the query
/// text (or the statement index) and a `connection_id` column holding
/// the ordinal of the connection that served it.
#[derive(Debug)]
pub struct ScriptedConnection {
    state: Arc<ScriptState>,
    id: u32,
    role: ConnectionRole,
    version: u32,
}

impl ScriptedConnection {
    fn echo(&self, value: SqlValue) -> Option<ResultSet> {
        Some(ResultSet::new(
            ["echo", "connection_id"],
            vec![vec![value, SqlValue::UInt(u64::from(self.id))]],
        ))
    }
}

impl Connection for ScriptedConnection {
    const MIN_SERVER_VERSION: u32 = 50700;

    fn open(info: &ConnectionInfo, role: ConnectionRole) -> Result<Self, DriverError> {
        let state = SCRIPTS.lock().get(&info.database).cloned().ok_or_else(|| {
            DriverError::new(
                ErrorKind::Other,
                2005,
                format!("no script registered for database `{}`", info.database),
            )
        })?;

        let id = state.opens.fetch_add(1, Ordering::SeqCst);
        if state.options.fail_open_at == Some(id) {
            return Err(DriverError::new(
                ErrorKind::Connection,
                2003,
                format!("scripted open failure for connection {id}"),
            ));
        }

        let version = if state.options.old_server_from.is_some_and(|from| id >= from) {
            ANCIENT_SERVER
        } else {
            state.options.server_version.unwrap_or(MODERN_SERVER)
        };

        state.record(JournalEvent::Opened { id, role });
        Ok(Self {
            state,
            id,
            role,
            version,
        })
    }

    fn server_version(&self) -> u32 {
        self.version
    }

    fn ping(&mut self) {
        self.state.record(JournalEvent::Ping { id: self.id });
    }

    fn execute(&mut self, sql: &str) -> bool {
        self.state.record(JournalEvent::Execute {
            id: self.id,
            sql: sql.to_string(),
        });
        true
    }

    fn execute_prepared(&mut self, stmt: &PreparedStatement) -> bool {
        self.state.record(JournalEvent::ExecutePrepared {
            id: self.id,
            index: stmt.index(),
        });
        true
    }

    fn query(&mut self, sql: &str) -> Option<ResultSet> {
        if let Some(delay) = self.state.options.query_delay {
            thread::sleep(delay);
        }
        self.state.record(JournalEvent::Query {
            id: self.id,
            sql: sql.to_string(),
        });
        if self.state.options.empty_queries.iter().any(|q| q == sql) {
            return None;
        }
        self.echo(SqlValue::Text(sql.to_string()))
    }

    fn query_prepared(&mut self, stmt: &PreparedStatement) -> Option<ResultSet> {
        if let Some(delay) = self.state.options.query_delay {
            thread::sleep(delay);
        }
        self.state.record(JournalEvent::QueryPrepared {
            id: self.id,
            index: stmt.index(),
        });
        self.echo(SqlValue::UInt(u64::from(stmt.index().0)))
    }

    fn execute_transaction(&mut self, transaction: &Transaction) -> Result<(), DriverError> {
        let attempt = self.state.transaction_attempts.fetch_add(1, Ordering::SeqCst);
        self.state.record(JournalEvent::Transaction {
            id: self.id,
            statements: transaction.len(),
        });
        if attempt < self.state.options.deadlock_commits {
            return Err(DriverError::new(
                ErrorKind::Deadlock,
                1213,
                "deadlock found when trying to get lock",
            ));
        }
        if self.state.options.reject_commits {
            return Err(DriverError::new(
                ErrorKind::Rejected,
                1064,
                "scripted commit rejection",
            ));
        }
        Ok(())
    }

    fn prepare_statements(&mut self) -> Result<Vec<StatementMeta>, DriverError> {
        self.state.record(JournalEvent::Prepare {
            id: self.id,
            role: self.role,
        });
        if self.state.options.fail_prepare {
            return Err(DriverError::new(
                ErrorKind::Rejected,
                1243,
                "scripted preparation failure",
            ));
        }

        let mut metas: Vec<StatementMeta> = TEST_CATALOGUE
            .iter()
            .filter(|def| def.usage.applies_to(self.role))
            .map(|def| StatementMeta {
                index: def.index,
                parameter_count: placeholder_count(def.sql),
            })
            .collect();
        if self.role == ConnectionRole::Asynchronous {
            for (index, count) in &self.state.options.misreport_async {
                for meta in &mut metas {
                    if meta.index == StatementIndex(*index) {
                        meta.parameter_count = *count;
                    }
                }
            }
        }
        Ok(metas)
    }

    fn escape_string(&mut self, input: &str) -> String {
        self.state.record(JournalEvent::Escape { id: self.id });
        input.replace('\'', "''")
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.state.record(JournalEvent::Closed { id: self.id });
    }
}

fn placeholder_count(sql: &str) -> u32 {
    u32::try_from(sql.bytes().filter(|b| *b == b'?').count()).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Deferred operations land on worker threads, so assertions about them
/// have to wait for the queue to drain; a second is plenty on any
/// machine when nothing is wrong.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Install a fmt subscriber honoring `RUST_LOG`, once per process.
///
/// Safe to call from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_parameter_counts_follow_placeholders() {
        assert_eq!(placeholder_count(TEST_CATALOGUE[0].sql), 1);
        assert_eq!(placeholder_count(TEST_CATALOGUE[1].sql), 5);
        assert_eq!(placeholder_count(TEST_CATALOGUE[2].sql), 1);
        assert_eq!(placeholder_count(TEST_CATALOGUE[3].sql), 2);
    }

    #[test]
    fn test_query_echoes_sql_and_connection_id() {
        let handle = script("unit_echo", ScriptOptions::new());
        let info =
            ConnectionInfo::from_connection_string(&handle.connection_string()).unwrap();
        let mut conn =
            ScriptedConnection::open(&info, ConnectionRole::Synchronous).unwrap();

        let rows = conn.query("SELECT 1").unwrap();
        let row = rows.first().unwrap();
        assert_eq!(row.get_by_name::<String>("echo").unwrap(), "SELECT 1");
        assert_eq!(row.get_by_name::<u32>("connection_id").unwrap(), 0);
    }

    #[test]
    fn test_journal_tracks_opens_and_closes() {
        let handle = script("unit_journal", ScriptOptions::new());
        let info =
            ConnectionInfo::from_connection_string(&handle.connection_string()).unwrap();

        {
            let _conn = ScriptedConnection::open(&info, ConnectionRole::Asynchronous).unwrap();
            assert_eq!(handle.live_connections(), 1);
        }
        assert_eq!(handle.live_connections(), 0);
    }

    #[test]
    fn test_open_without_script_fails() {
        let info = ConnectionInfo::from_connection_string("database=never_registered").unwrap();
        let err = ScriptedConnection::open(&info, ConnectionRole::Synchronous).unwrap_err();
        assert_eq!(err.code(), 2005);
    }

    #[test]
    fn test_escape_doubles_quotes() {
        let handle = script("unit_escape", ScriptOptions::new());
        let info =
            ConnectionInfo::from_connection_string(&handle.connection_string()).unwrap();
        let mut conn = ScriptedConnection::open(&info, ConnectionRole::Synchronous).unwrap();
        assert_eq!(conn.escape_string("O'Neill"), "O''Neill");
    }
}
