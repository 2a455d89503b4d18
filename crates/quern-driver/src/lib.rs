//! # quern-driver
//!
//! Connection contract and SQL data model for the quern worker pool.
//!
//! This crate defines everything a database backend must provide to be
//! driven by `quern-pool`: the [`Connection`] trait, connection
//! configuration parsed from `key=value;` strings, the [`SqlValue`] /
//! [`ResultSet`] data model with typed access, prepared-statement
//! catalogue types, and client-side [`Transaction`] batches.
//!
//! ## Design
//!
//! The pool never reaches past the [`Connection`] trait: drivers own the
//! wire protocol, statement compilation and escaping, while the pool owns
//! scheduling, locking and lifecycle. Statement catalogues are declared
//! per driver as `const` tables of [`StatementDef`] entries addressed by
//! stable indices, which keeps call sites free of SQL strings.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod row;
pub mod statement;
pub mod transaction;
pub mod value;

pub use config::{ConnectionInfo, SslMode};
pub use connection::{Connection, ConnectionRole, format_server_version};
pub use error::{ConfigError, DriverError, ErrorKind};
pub use row::{Column, ResultSet, Row};
pub use statement::{
    MAX_STATEMENT_PARAMETERS, PreparedStatement, StatementDef, StatementIndex, StatementMeta,
    StatementUse,
};
pub use transaction::{Transaction, TransactionStatement};
pub use value::{FromSql, SqlValue, TypeError};
