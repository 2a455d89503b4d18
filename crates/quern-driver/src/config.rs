//! Connection configuration.

use std::fmt;

use crate::error::ConfigError;

/// TLS requirement for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never negotiate TLS.
    Disabled,
    /// Negotiate TLS when the server offers it, fall back to plaintext.
    #[default]
    Preferred,
    /// Refuse to connect without TLS.
    Required,
}

impl SslMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "off" | "disabled" | "0" => Ok(Self::Disabled),
            "preferred" => Ok(Self::Preferred),
            "required" | "on" | "1" => Ok(Self::Required),
            _ => Err(ConfigError::InvalidSslMode {
                value: value.to_string(),
            }),
        }
    }
}

/// Immutable parameters describing how to reach one database.
///
/// Parsed once from a connection string and held by the pool for its whole
/// lifetime; every connection the pool opens is built from the same
/// `ConnectionInfo`.
#[derive(Clone)]
pub struct ConnectionInfo {
    /// Server hostname or IP address.
    pub host: String,

    /// Server TCP port (default: 3306). Ignored when `socket` is set.
    pub port: u16,

    /// Unix domain socket path, used instead of TCP when present.
    pub socket: Option<String>,

    /// User account name.
    pub user: String,

    /// Account password.
    pub password: String,

    /// Database (schema) name to select after connecting.
    pub database: String,

    /// TLS requirement.
    pub ssl: SslMode,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            socket: None,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            ssl: SslMode::default(),
        }
    }
}

// Manual Debug so connection info can be logged without leaking the
// password.
impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl", &self.ssl)
            .finish()
    }
}

impl ConnectionInfo {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into a `ConnectionInfo`.
    ///
    /// Supports `key=value;` style connection strings:
    /// ```text
    /// host=db.example.com;port=3306;user=worldserver;password=secret;database=characters;ssl=preferred
    /// ```
    ///
    /// Keys are case-insensitive and surrounding whitespace is trimmed;
    /// empty segments are skipped. A `port` value that does not parse as
    /// a TCP port is treated as a Unix socket path. Unknown keys are
    /// ignored with a debug log so that strings written for richer
    /// drivers still parse.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, ConfigError> {
        let mut info = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part.split_once('=').ok_or_else(|| ConfigError::InvalidSegment {
                segment: part.to_string(),
            })?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" => {
                    info.host = value.to_string();
                }
                "port" => {
                    // A socket path may stand in for the port number.
                    match value.parse() {
                        Ok(port) => info.port = port,
                        Err(_) => info.socket = Some(value.to_string()),
                    }
                }
                "socket" => {
                    info.socket = Some(value.to_string());
                }
                "user" | "username" => {
                    info.user = value.to_string();
                }
                "password" | "pwd" => {
                    info.password = value.to_string();
                }
                "database" | "db" => {
                    info.database = value.to_string();
                }
                "ssl" => {
                    info.ssl = SslMode::parse(value)?;
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        Ok(info)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user account name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the account password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the TLS requirement.
    #[must_use]
    pub fn ssl(mut self, ssl: SslMode) -> Self {
        self.ssl = ssl;
        self
    }
}
