//! SQL value representation and typed conversions.

use thiserror::Error;

/// A single SQL value, either bound as a parameter or read from a result
/// row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean / TINYINT(1).
    Bool(bool),
    /// Signed integer up to 64 bits.
    Int(i64),
    /// Unsigned integer up to 64 bits.
    UInt(u64),
    /// Floating point value.
    Float(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Whether this value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// A short name for the value's type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Errors that can occur converting a [`SqlValue`] into a Rust type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// The value's type does not convert into the requested type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The requested Rust type.
        expected: &'static str,
        /// What was actually there.
        actual: String,
    },

    /// The value is numerically outside the requested type's range.
    #[error("value {value} out of range for {target}")]
    OutOfRange {
        /// The offending value, rendered as text.
        value: String,
        /// The requested Rust type.
        target: &'static str,
    },

    /// The row has no column at the requested position or name.
    #[error("no column {wanted} in a {width}-column row")]
    NoColumn {
        /// The requested position or name, rendered as text.
        wanted: String,
        /// How many columns the row holds.
        width: usize,
    },
}

/// Conversion from a [`SqlValue`] into a concrete Rust type.
///
/// Numeric conversions are checked: a stored `Int(-1)` does not convert
/// into `u32`. NULL never converts through [`FromSql::from_sql`]; use
/// [`FromSql::from_sql_nullable`] (or `Row::try_get`) when NULL is an
/// expected outcome.
pub trait FromSql: Sized {
    /// Convert a non-NULL value.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert a possibly-NULL value, mapping NULL to `None`.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        match value {
            SqlValue::Null => Ok(None),
            other => Self::from_sql(other).map(Some),
        }
    }
}

macro_rules! impl_from_sql_int {
    ($($ty:ty),* $(,)?) => {$(
        impl FromSql for $ty {
            fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                match value {
                    SqlValue::Int(v) => <$ty>::try_from(*v).map_err(|_| TypeError::OutOfRange {
                        value: v.to_string(),
                        target: stringify!($ty),
                    }),
                    SqlValue::UInt(v) => <$ty>::try_from(*v).map_err(|_| TypeError::OutOfRange {
                        value: v.to_string(),
                        target: stringify!($ty),
                    }),
                    SqlValue::Bool(v) => Ok(<$ty>::from(*v)),
                    other => Err(TypeError::TypeMismatch {
                        expected: stringify!($ty),
                        actual: other.type_name().to_string(),
                    }),
                }
            }
        }
    )*};
}

impl_from_sql_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v != 0),
            SqlValue::UInt(v) => Ok(*v != 0),
            other => Err(TypeError::TypeMismatch {
                expected: "bool",
                actual: other.type_name().to_string(),
            }),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Int(v) => Ok(*v as f64),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::UInt(v) => Ok(*v as f64),
            other => Err(TypeError::TypeMismatch {
                expected: "f64",
                actual: other.type_name().to_string(),
            }),
        }
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        #[allow(clippy::cast_possible_truncation)]
        f64::from_sql(value).map(|v| v as f32)
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(TypeError::TypeMismatch {
                expected: "string",
                actual: other.type_name().to_string(),
            }),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bytes(v) => Ok(v.clone()),
            SqlValue::Text(v) => Ok(v.clone().into_bytes()),
            other => Err(TypeError::TypeMismatch {
                expected: "bytes",
                actual: other.type_name().to_string(),
            }),
        }
    }
}
