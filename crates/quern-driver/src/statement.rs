//! Prepared statement catalogue types and the bindable statement proxy.
//!
//! Every driver declares a fixed catalogue of parameterized statements,
//! each addressed by a small stable index. Connections compile the
//! catalogue entries matching their role when asked to prepare, and report
//! each entry's parameter count back to the pool, which records it once in
//! a shared descriptor table. Callers then obtain a [`PreparedStatement`]
//! proxy for an index, bind parameters through the typed setters, and hand
//! it to the pool for execution.

use std::fmt;

use crate::connection::ConnectionRole;
use crate::value::SqlValue;

/// Upper bound (exclusive) for a statement's parameter count.
///
/// Descriptor slots are 8 bits wide; a catalogue entry declaring this many
/// parameters or more is a driver bug, not a runtime condition.
pub const MAX_STATEMENT_PARAMETERS: u32 = 255;

/// Identifies one entry of a driver's statement catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementIndex(pub u32);

impl fmt::Display for StatementIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StatementIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Which connection role a catalogue entry is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementUse {
    /// Compiled only on synchronous connections.
    Sync,
    /// Compiled only on asynchronous connections.
    Async,
    /// Compiled on every connection.
    Both,
}

impl StatementUse {
    /// Whether an entry with this usage is compiled on a connection of the
    /// given role.
    #[must_use]
    pub fn applies_to(self, role: ConnectionRole) -> bool {
        match self {
            Self::Both => true,
            Self::Sync => role == ConnectionRole::Synchronous,
            Self::Async => role == ConnectionRole::Asynchronous,
        }
    }
}

/// One entry of a driver's statement catalogue.
#[derive(Debug, Clone, Copy)]
pub struct StatementDef {
    /// The entry's stable index.
    pub index: StatementIndex,
    /// The SQL template with `?` placeholders.
    pub sql: &'static str,
    /// Which connection role compiles this entry.
    pub usage: StatementUse,
}

impl StatementDef {
    /// Build a catalogue entry; usable in `const` catalogue arrays.
    #[must_use]
    pub const fn new(index: u32, sql: &'static str, usage: StatementUse) -> Self {
        Self {
            index: StatementIndex(index),
            sql,
            usage,
        }
    }
}

/// What a connection reports for one catalogue entry it compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementMeta {
    /// The entry's index.
    pub index: StatementIndex,
    /// The number of `?` placeholders the server found in the template.
    pub parameter_count: u32,
}

/// A bindable proxy for one prepared statement.
///
/// Obtained from the pool, which sizes the parameter slots from the
/// descriptor table. Unbound slots are NULL. The proxy is consumed by the
/// execute/query call that takes it, whatever the outcome.
///
/// # Example
///
/// ```
/// use quern_driver::PreparedStatement;
///
/// let mut stmt = PreparedStatement::new(7u32.into(), 2);
/// stmt.set_u64(0, 42);
/// stmt.set_str(1, "Alliance");
/// assert_eq!(stmt.parameter_count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    index: StatementIndex,
    values: Vec<SqlValue>,
}

impl PreparedStatement {
    /// Create a proxy for `index` with `parameter_count` unbound slots.
    #[must_use]
    pub fn new(index: StatementIndex, parameter_count: u8) -> Self {
        Self {
            index,
            values: vec![SqlValue::Null; usize::from(parameter_count)],
        }
    }

    /// The catalogue index this proxy refers to.
    #[must_use]
    pub fn index(&self) -> StatementIndex {
        self.index
    }

    /// The number of parameter slots.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // slots are allocated from a u8
    pub fn parameter_count(&self) -> u8 {
        self.values.len() as u8
    }

    /// The bound parameter values, in positional order.
    #[must_use]
    pub fn parameters(&self) -> &[SqlValue] {
        &self.values
    }

    /// Bind a raw [`SqlValue`].
    ///
    /// # Panics
    ///
    /// Panics when `index` is outside the statement's declared parameter
    /// count; binding past the declared count is a programmer error.
    pub fn set(&mut self, index: u8, value: SqlValue) {
        let slot = usize::from(index);
        assert!(
            slot < self.values.len(),
            "parameter index {index} out of range for statement {} ({} parameters)",
            self.index,
            self.values.len(),
        );
        self.values[slot] = value;
    }

    /// Bind SQL NULL.
    pub fn set_null(&mut self, index: u8) {
        self.set(index, SqlValue::Null);
    }

    /// Bind a `bool` parameter.
    pub fn set_bool(&mut self, index: u8, value: bool) {
        self.set(index, SqlValue::Bool(value));
    }

    /// Bind an `f32` parameter.
    pub fn set_f32(&mut self, index: u8, value: f32) {
        self.set(index, SqlValue::Float(f64::from(value)));
    }

    /// Bind an `f64` parameter.
    pub fn set_f64(&mut self, index: u8, value: f64) {
        self.set(index, SqlValue::Float(value));
    }

    /// Bind a string parameter.
    pub fn set_str(&mut self, index: u8, value: impl Into<String>) {
        self.set(index, SqlValue::Text(value.into()));
    }

    /// Bind a binary parameter.
    pub fn set_bytes(&mut self, index: u8, value: impl Into<Vec<u8>>) {
        self.set(index, SqlValue::Bytes(value.into()));
    }
}

macro_rules! impl_int_setters {
    ($(($name:ident, $ty:ty, $variant:ident, $store:ty)),* $(,)?) => {$(
        impl PreparedStatement {
            #[doc = concat!("Bind a `", stringify!($ty), "` parameter.")]
            pub fn $name(&mut self, index: u8, value: $ty) {
                self.set(index, SqlValue::$variant(<$store>::from(value)));
            }
        }
    )*};
}

impl_int_setters!(
    (set_i8, i8, Int, i64),
    (set_i16, i16, Int, i64),
    (set_i32, i32, Int, i64),
    (set_i64, i64, Int, i64),
    (set_u8, u8, UInt, u64),
    (set_u16, u16, UInt, u64),
    (set_u32, u32, UInt, u64),
    (set_u64, u64, UInt, u64),
);
