//! Pool lifecycle error types.

use std::io;

use thiserror::Error;

use quern_driver::{ConnectionRole, DriverError, format_server_version};

/// Errors that can occur while opening the pool.
///
/// Opening is all-or-nothing: any of these means the pool holds no
/// connections and may be reconfigured and opened again.
#[derive(Debug, Error)]
pub enum OpenError {
    /// A connection in one of the batches failed to establish.
    #[error("failed to open {role} connection: {source}")]
    Driver {
        /// Role of the batch the failing connection belonged to.
        role: ConnectionRole,
        /// The underlying driver failure.
        #[source]
        source: DriverError,
    },

    /// The server is older than the minimum the driver supports.
    #[error(
        "server version {} is below the required minimum {}",
        format_server_version(*reported),
        format_server_version(*minimum)
    )]
    ServerTooOld {
        /// Version the server reported.
        reported: u32,
        /// Minimum version the connection type requires.
        minimum: u32,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn database worker: {source}")]
    WorkerSpawn {
        /// The underlying spawn failure.
        #[source]
        source: io::Error,
    },
}

/// Errors that can occur while preparing the statement catalogue.
///
/// Preparation is all-or-nothing as well: on failure the pool closes
/// every connection before reporting the error.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// A connection failed to prepare its share of the catalogue.
    #[error("failed to prepare statements on {role} connection: {source}")]
    Driver {
        /// Role of the connection that failed.
        role: ConnectionRole,
        /// The underlying driver failure.
        #[source]
        source: DriverError,
    },
}
