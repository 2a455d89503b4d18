//! Row and result set representation.

use std::sync::Arc;

use crate::value::{FromSql, SqlValue, TypeError};

/// Column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column index within the row.
    pub ordinal: usize,
}

/// A row from a query result.
///
/// Column metadata is shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// The value at `index`, converted to `T`.
    ///
    /// An index past the row's end is an error, not a panic; so is a
    /// value `T` cannot represent (NULL included).
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        match self.values.get(index) {
            Some(value) => T::from_sql(value),
            None => Err(TypeError::NoColumn {
                wanted: index.to_string(),
                width: self.values.len(),
            }),
        }
    }

    /// Like [`Row::get`], addressing the column by name.
    ///
    /// Name matching ignores ASCII case.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        match self.position_of(name) {
            Some(index) => self.get(index),
            None => Err(TypeError::NoColumn {
                wanted: format!("`{name}`"),
                width: self.values.len(),
            }),
        }
    }

    /// Lossy variant of [`Row::get`]: NULL, absent columns and failed
    /// conversions all collapse to `None`.
    pub fn try_get<T: FromSql>(&self, index: usize) -> Option<T> {
        T::from_sql_nullable(self.get_raw(index)?).ok().flatten()
    }

    /// Lossy variant of [`Row::get_by_name`]; see [`Row::try_get`].
    pub fn try_get_by_name<T: FromSql>(&self, name: &str) -> Option<T> {
        self.try_get(self.position_of(name)?)
    }

    /// The stored value at `index`, unconverted.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// How many values the row holds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for a zero-width row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The column metadata, in ordinal order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Pairs each column with its value.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &SqlValue)> {
        self.columns.iter().zip(self.values.iter())
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }
}

impl IntoIterator for Row {
    type Item = SqlValue;
    type IntoIter = std::vec::IntoIter<SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a SqlValue;
    type IntoIter = std::slice::Iter<'a, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// An in-memory result set: shared column metadata plus zero or more rows.
///
/// Connections return `Option<ResultSet>` from their query entry points
/// and must map a zero-row result to `None`, so a `ResultSet` that reaches
/// a caller always has at least one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[Column]>,
    rows: Vec<Row>,
}

impl ResultSet {
    /// Build a result set from column names and row values.
    ///
    /// Rows shorter or longer than the column list are taken as-is; typed
    /// access past a row's end reports an error rather than panicking.
    pub fn new<N: Into<String>>(
        names: impl IntoIterator<Item = N>,
        rows: impl IntoIterator<Item = Vec<SqlValue>>,
    ) -> Self {
        let columns: Arc<[Column]> = names
            .into_iter()
            .enumerate()
            .map(|(ordinal, name)| Column {
                name: name.into(),
                ordinal,
            })
            .collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect();
        Self { columns, rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result set holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows of this result set.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// The column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::new(
            ["id", "name", "level"],
            vec![
                vec![
                    SqlValue::UInt(1),
                    SqlValue::Text("Thrall".to_string()),
                    SqlValue::UInt(60),
                ],
                vec![
                    SqlValue::UInt(2),
                    SqlValue::Text("Jaina".to_string()),
                    SqlValue::UInt(58),
                ],
            ],
        )
    }

    #[test]
    fn test_typed_access_by_index() {
        let result = sample();
        let row = result.first().unwrap();
        assert_eq!(row.get::<u32>(0).unwrap(), 1);
        assert_eq!(row.get::<String>(1).unwrap(), "Thrall");
    }

    #[test]
    fn test_access_by_name_is_case_insensitive() {
        let result = sample();
        let row = &result.rows()[1];
        assert_eq!(row.get_by_name::<u8>("LEVEL").unwrap(), 58);
    }

    #[test]
    fn test_out_of_bounds_is_an_error_not_a_panic() {
        let result = sample();
        let row = result.first().unwrap();
        assert_eq!(
            row.get::<u32>(9),
            Err(TypeError::NoColumn {
                wanted: "9".to_string(),
                width: 3,
            })
        );
        assert_eq!(row.try_get::<u32>(9), None);
    }

    #[test]
    fn test_unknown_column_name_is_reported() {
        let result = sample();
        let row = result.first().unwrap();
        let err = row.get_by_name::<u32>("faction").unwrap_err();
        assert_eq!(err.to_string(), "no column `faction` in a 3-column row");
        assert_eq!(row.try_get_by_name::<u32>("faction"), None);
    }

    #[test]
    fn test_rows_share_column_metadata() {
        let result = sample();
        assert_eq!(result.columns().len(), 3);
        assert_eq!(result.columns()[2].ordinal, 2);
        for row in &result {
            assert_eq!(row.columns().len(), 3);
        }
    }

    #[test]
    fn test_iteration_consumes_rows() {
        let names: Vec<String> = sample()
            .into_iter()
            .map(|row| row.get::<String>(1).unwrap())
            .collect();
        assert_eq!(names, ["Thrall", "Jaina"]);
    }
}
