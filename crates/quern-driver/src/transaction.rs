//! Client-side transaction batches.
//!
//! A [`Transaction`] buffers an ordered list of statements; nothing is
//! sent to any connection until the batch is committed through the pool.
//! The handle is cheaply cloneable so multiple call sites can append to
//! the same batch before one of them commits it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::statement::PreparedStatement;

/// One buffered statement of a transaction.
#[derive(Debug, Clone)]
pub enum TransactionStatement {
    /// Raw SQL text.
    Raw(String),
    /// A bound prepared-statement proxy.
    Prepared(PreparedStatement),
}

#[derive(Debug, Default)]
struct TransactionInner {
    statements: Vec<TransactionStatement>,
    submitted: bool,
}

/// An ordered, append-only batch of statements committed atomically by a
/// single connection.
///
/// A transaction is single-use: once it has been handed to one of the
/// pool's commit entry points, further appends are rejected with an error
/// log and otherwise ignored.
///
/// # Example
///
/// ```
/// use quern_driver::{PreparedStatement, Transaction};
///
/// let trans = Transaction::new();
/// trans.append("UPDATE account SET online = 0");
/// let mut stmt = PreparedStatement::new(4u32.into(), 1);
/// stmt.set_u32(0, 11);
/// trans.append_prepared(stmt);
/// assert_eq!(trans.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    inner: Arc<Mutex<TransactionInner>>,
}

impl Transaction {
    /// Create an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw SQL to the batch.
    pub fn append(&self, sql: impl Into<String>) {
        self.push(TransactionStatement::Raw(sql.into()));
    }

    /// Append a bound prepared statement to the batch.
    pub fn append_prepared(&self, stmt: PreparedStatement) {
        self.push(TransactionStatement::Prepared(stmt));
    }

    fn push(&self, statement: TransactionStatement) {
        let mut inner = self.inner.lock();
        if inner.submitted {
            tracing::error!("appending to a transaction that was already submitted; dropped");
            return;
        }
        inner.statements.push(statement);
    }

    /// Number of buffered statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().statements.len()
    }

    /// Whether the batch holds no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().statements.is_empty()
    }

    /// Run `f` over the buffered statements while holding the batch lock.
    ///
    /// This is how connections iterate the batch during
    /// [`execute_transaction`](crate::Connection::execute_transaction).
    pub fn with_statements<R>(&self, f: impl FnOnce(&[TransactionStatement]) -> R) -> R {
        f(&self.inner.lock().statements)
    }

    /// Mark the transaction as submitted, closing it to further appends.
    ///
    /// Returns `false` when it had already been submitted, which callers
    /// treat as a double-commit programming error.
    pub fn mark_submitted(&self) -> bool {
        let mut inner = self.inner.lock();
        let first = !inner.submitted;
        inner.submitted = true;
        first
    }

    /// Discard the buffered statements after a terminal commit failure.
    pub fn cleanup(&self) {
        self.inner.lock().statements.clear();
    }
}
