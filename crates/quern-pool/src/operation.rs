//! Deferred units of database work.
//!
//! An [`Operation`] captures one unit of work plus, where the submitter
//! cares about the outcome, the producer half of a result cell. The
//! calling thread builds the operation, the pool queues it, and exactly
//! one worker thread consumes it against its own connection. Dropping an
//! unexecuted operation (queue cancellation, pool teardown) resolves its
//! result cell as cancelled through the promise's drop handler.

use quern_driver::{Connection, PreparedStatement, ResultSet, Transaction};

use crate::holder::QueryHolder;
use crate::result::Promise;

/// One deferred unit of database work.
#[derive(Debug)]
pub enum Operation {
    /// Raw SQL, optionally with a result channel.
    RawStatement {
        /// The statement text.
        sql: String,
        /// Present when the submitter wants the rows back.
        result: Option<Promise<Option<ResultSet>>>,
    },
    /// A bound prepared statement, optionally with a result channel.
    PreparedStatement {
        /// The bound statement proxy.
        stmt: PreparedStatement,
        /// Present when the submitter wants the rows back.
        result: Option<Promise<Option<ResultSet>>>,
    },
    /// A fire-and-forget transaction commit.
    Transaction {
        /// The buffered statement batch.
        transaction: Transaction,
    },
    /// A transaction commit reporting success through a result channel.
    TransactionWithResult {
        /// The buffered statement batch.
        transaction: Transaction,
        /// Resolves to whether the commit succeeded.
        result: Promise<bool>,
    },
    /// A batched query holder; the holder itself travels back through
    /// the result channel once its slots have been executed.
    QueryHolder {
        /// The slot batch to execute.
        holder: QueryHolder,
        /// Resolves to the holder, with its results filled in.
        result: Promise<QueryHolder>,
    },
    /// A connection keep-alive touch. No result channel.
    Ping,
}

impl Operation {
    /// Short tag for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RawStatement { .. } => "statement",
            Self::PreparedStatement { .. } => "prepared",
            Self::Transaction { .. } => "transaction",
            Self::TransactionWithResult { .. } => "transaction-with-result",
            Self::QueryHolder { .. } => "query-holder",
            Self::Ping => "ping",
        }
    }

    /// Execute this operation against `connection`, resolving the result
    /// channel where one is attached.
    pub(crate) fn run_on<T: Connection>(self, connection: &mut T) {
        match self {
            Self::RawStatement { sql, result: None } => {
                connection.execute(&sql);
            }
            Self::RawStatement {
                sql,
                result: Some(promise),
            } => {
                promise.resolve(connection.query(&sql));
            }
            Self::PreparedStatement { stmt, result: None } => {
                connection.execute_prepared(&stmt);
            }
            Self::PreparedStatement {
                stmt,
                result: Some(promise),
            } => {
                promise.resolve(connection.query_prepared(&stmt));
            }
            Self::Transaction { transaction } => {
                if let Err(err) = connection.execute_transaction(&transaction) {
                    tracing::error!(
                        code = err.code(),
                        error = %err,
                        statements = transaction.len(),
                        "async transaction commit failed"
                    );
                    transaction.cleanup();
                }
            }
            Self::TransactionWithResult {
                transaction,
                result,
            } => match connection.execute_transaction(&transaction) {
                Ok(()) => result.resolve(true),
                Err(err) => {
                    tracing::error!(
                        code = err.code(),
                        error = %err,
                        statements = transaction.len(),
                        "async transaction commit failed"
                    );
                    transaction.cleanup();
                    result.resolve(false);
                }
            },
            Self::QueryHolder { mut holder, result } => {
                holder.execute_on(connection);
                result.resolve(holder);
            }
            Self::Ping => connection.ping(),
        }
    }
}

#[cfg(test)]
mod tests {
    use quern_driver::{
        ConnectionInfo, ConnectionRole, DriverError, ErrorKind, SqlValue, StatementMeta,
    };

    use super::*;
    use crate::result::{Completion, result_cell};

    /// Minimal in-process connection that journals what reaches it.
    struct Recorder {
        calls: Vec<String>,
        fail_transactions: bool,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_transactions: false,
            }
        }
    }

    impl Connection for Recorder {
        const MIN_SERVER_VERSION: u32 = 50700;

        fn open(_info: &ConnectionInfo, _role: ConnectionRole) -> Result<Self, DriverError> {
            Ok(Self::new())
        }

        fn server_version(&self) -> u32 {
            80036
        }

        fn ping(&mut self) {
            self.calls.push("ping".to_string());
        }

        fn execute(&mut self, sql: &str) -> bool {
            self.calls.push(format!("execute {sql}"));
            true
        }

        fn execute_prepared(&mut self, stmt: &PreparedStatement) -> bool {
            self.calls.push(format!("execute-prepared {}", stmt.index()));
            true
        }

        fn query(&mut self, sql: &str) -> Option<ResultSet> {
            self.calls.push(format!("query {sql}"));
            Some(ResultSet::new(
                ["echo"],
                vec![vec![SqlValue::Text(sql.to_string())]],
            ))
        }

        fn query_prepared(&mut self, stmt: &PreparedStatement) -> Option<ResultSet> {
            self.calls.push(format!("query-prepared {}", stmt.index()));
            None
        }

        fn execute_transaction(&mut self, transaction: &Transaction) -> Result<(), DriverError> {
            self.calls
                .push(format!("transaction {}", transaction.len()));
            if self.fail_transactions {
                Err(DriverError::new(ErrorKind::Rejected, 1064, "scripted"))
            } else {
                Ok(())
            }
        }

        fn prepare_statements(&mut self) -> Result<Vec<StatementMeta>, DriverError> {
            Ok(Vec::new())
        }

        fn escape_string(&mut self, input: &str) -> String {
            input.to_string()
        }
    }

    #[test]
    fn test_statement_without_result_executes() {
        let mut conn = Recorder::new();
        Operation::RawStatement {
            sql: "DELETE FROM corpse".to_string(),
            result: None,
        }
        .run_on(&mut conn);
        assert_eq!(conn.calls, ["execute DELETE FROM corpse"]);
    }

    #[test]
    fn test_statement_with_result_queries_and_resolves() {
        let mut conn = Recorder::new();
        let (promise, pending) = result_cell();
        Operation::RawStatement {
            sql: "SELECT 1".to_string(),
            result: Some(promise),
        }
        .run_on(&mut conn);

        let Completion::Ready(Some(rows)) = pending.wait() else {
            panic!("expected rows back");
        };
        assert_eq!(rows.first().unwrap().get::<String>(0).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_transaction_with_result_reports_success() {
        let mut conn = Recorder::new();
        let transaction = Transaction::new();
        transaction.append("UPDATE a SET b = 1");
        transaction.append("UPDATE a SET b = 2");
        let (promise, pending) = result_cell();
        Operation::TransactionWithResult {
            transaction,
            result: promise,
        }
        .run_on(&mut conn);
        assert_eq!(pending.wait(), Completion::Ready(true));
        assert_eq!(conn.calls, ["transaction 2"]);
    }

    #[test]
    fn test_failed_transaction_cleans_up_and_reports_false() {
        let mut conn = Recorder::new();
        conn.fail_transactions = true;
        let transaction = Transaction::new();
        transaction.append("UPDATE a SET b = 1");
        let observer = transaction.clone();
        let (promise, pending) = result_cell();
        Operation::TransactionWithResult {
            transaction,
            result: promise,
        }
        .run_on(&mut conn);
        assert_eq!(pending.wait(), Completion::Ready(false));
        assert!(observer.is_empty(), "buffered statements are discarded");
    }

    #[test]
    fn test_holder_travels_back_with_results() {
        let mut conn = Recorder::new();
        let mut holder = QueryHolder::new(2);
        holder.set_query(0, "SELECT a");
        let (promise, pending) = result_cell();
        Operation::QueryHolder {
            holder,
            result: promise,
        }
        .run_on(&mut conn);

        let Completion::Ready(mut holder) = pending.wait() else {
            panic!("expected the holder back");
        };
        assert!(holder.result(0).is_some());
        assert!(holder.result(1).is_none());
    }

    #[test]
    fn test_dropping_unexecuted_operation_cancels_result() {
        let (promise, pending) = result_cell();
        let op = Operation::RawStatement {
            sql: "SELECT 1".to_string(),
            result: Some(promise),
        };
        drop(op);
        assert_eq!(pending.wait(), Completion::Cancelled);
    }

    #[test]
    fn test_ping_touches_connection() {
        let mut conn = Recorder::new();
        Operation::Ping.run_on(&mut conn);
        assert_eq!(conn.calls, ["ping"]);
        assert_eq!(Operation::Ping.kind(), "ping");
    }
}
