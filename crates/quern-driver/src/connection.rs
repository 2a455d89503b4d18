//! The connection contract between drivers and the worker pool.

use std::fmt;

use crate::config::ConnectionInfo;
use crate::error::DriverError;
use crate::row::ResultSet;
use crate::statement::{PreparedStatement, StatementMeta};
use crate::transaction::Transaction;

/// Which side of the pool a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Locked ad hoc by caller threads for blocking calls.
    Synchronous,
    /// Driven exclusively by one dedicated worker thread.
    Asynchronous,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synchronous => f.write_str("synchronous"),
            Self::Asynchronous => f.write_str("asynchronous"),
        }
    }
}

/// One physical database link.
///
/// The pool treats connections as opaque capability objects: it opens
/// them, serializes access to them behind a lock, calls the entry points
/// below, and drops them on close. Everything protocol-level (handshake,
/// statement compilation, escaping, reconnect handling) lives behind this
/// trait, so new backends can be added without touching pool logic.
///
/// Exclusive use is enforced by the pool, which is why every execution
/// entry point takes `&mut self`; implementations never need their own
/// locking.
///
/// ## Result conventions
///
/// The query entry points return `Option<ResultSet>` where `None` covers
/// both "zero rows" and "query failed"; the two are deliberately not
/// distinguished at this layer, and implementations are expected to log
/// failures when they detect them. Callers that need to know why must
/// re-query.
pub trait Connection: Sized + Send + 'static {
    /// Minimum server version this driver supports, encoded as
    /// `major * 10000 + minor * 100 + patch` (so `50700` reads "5.7.0").
    /// The pool refuses to open when a connection reports less.
    const MIN_SERVER_VERSION: u32;

    /// Open a new physical connection described by `info`.
    ///
    /// `role` tells the connection which side of the pool it will serve;
    /// [`prepare_statements`](Self::prepare_statements) compiles only the
    /// catalogue entries whose usage matches it.
    fn open(info: &ConnectionInfo, role: ConnectionRole) -> Result<Self, DriverError>;

    /// The server version reported during the handshake, in the same
    /// encoding as [`MIN_SERVER_VERSION`](Self::MIN_SERVER_VERSION).
    fn server_version(&self) -> u32;

    /// Touch the connection so the server does not drop it as idle.
    fn ping(&mut self);

    /// Execute raw SQL for its side effects. Returns whether the server
    /// accepted the statement.
    fn execute(&mut self, sql: &str) -> bool;

    /// Execute a bound prepared statement for its side effects.
    fn execute_prepared(&mut self, stmt: &PreparedStatement) -> bool;

    /// Run a raw query. `None` means zero rows or failure.
    fn query(&mut self, sql: &str) -> Option<ResultSet>;

    /// Run a bound prepared statement as a query. `None` means zero rows
    /// or failure.
    fn query_prepared(&mut self, stmt: &PreparedStatement) -> Option<ResultSet>;

    /// Atomically execute a transaction batch.
    ///
    /// Implementations begin, run every buffered statement in order,
    /// commit, and roll back on the first failure, reporting it as the
    /// returned error.
    fn execute_transaction(&mut self, transaction: &Transaction) -> Result<(), DriverError>;

    /// Compile the catalogue entries matching this connection's role and
    /// report `(index, parameter count)` for each compiled entry.
    fn prepare_statements(&mut self) -> Result<Vec<StatementMeta>, DriverError>;

    /// Escape `input` for safe embedding in a statement string.
    fn escape_string(&mut self, input: &str) -> String;
}

/// Render an encoded server version as dotted text, e.g. `50744` as
/// "5.7.44".
#[must_use]
pub fn format_server_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version / 10000,
        (version % 10000) / 100,
        version % 100
    )
}
