//! Batched query holders.
//!
//! A [`QueryHolder`] bundles several heterogeneous queries into one
//! deferred unit of work: the caller fills a fixed set of slots, hands
//! the holder to the pool, and a worker executes every occupied slot in
//! order on a single connection. The holder then travels back to the
//! caller through the result cell, carrying the per-slot results.

use quern_driver::{Connection, PreparedStatement, ResultSet};

#[derive(Debug, Clone)]
enum HolderQuery {
    Raw(String),
    Prepared(PreparedStatement),
}

/// A fixed-size batch of queries resolved together as one operation.
///
/// Slot indices are stable: the result for slot `n` is retrieved with
/// `result(n)` once the holder has come back from the pool. Unoccupied
/// slots simply yield no result. Out-of-range slot accesses are reported
/// with an error log and otherwise ignored.
///
/// # Example
///
/// ```
/// use quern_pool::QueryHolder;
///
/// let mut holder = QueryHolder::new(2);
/// holder.set_query(0, "SELECT name FROM guild WHERE id = 7");
/// holder.set_query(1, "SELECT COUNT(*) FROM guild_member WHERE guild = 7");
/// assert_eq!(holder.slot_count(), 2);
/// ```
#[derive(Debug)]
pub struct QueryHolder {
    queries: Vec<Option<HolderQuery>>,
    results: Vec<Option<ResultSet>>,
}

impl QueryHolder {
    /// Create a holder with `slots` empty query slots.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            queries: (0..slots).map(|_| None).collect(),
            results: (0..slots).map(|_| None).collect(),
        }
    }

    /// Number of slots this holder was created with.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.queries.len()
    }

    /// Put raw SQL into `slot`. Returns whether the slot exists.
    pub fn set_query(&mut self, slot: usize, sql: impl Into<String>) -> bool {
        self.set(slot, HolderQuery::Raw(sql.into()))
    }

    /// Put a bound prepared statement into `slot`. Returns whether the
    /// slot exists.
    pub fn set_prepared_query(&mut self, slot: usize, stmt: PreparedStatement) -> bool {
        self.set(slot, HolderQuery::Prepared(stmt))
    }

    fn set(&mut self, slot: usize, query: HolderQuery) -> bool {
        let Some(entry) = self.queries.get_mut(slot) else {
            tracing::error!(
                slot,
                slots = self.queries.len(),
                "attempted to fill a query holder slot that does not exist"
            );
            return false;
        };
        *entry = Some(query);
        true
    }

    /// Take the result of `slot`, leaving the slot empty.
    ///
    /// `None` for unoccupied slots, for queries that produced zero rows
    /// or failed, and for results that were already taken.
    pub fn result(&mut self, slot: usize) -> Option<ResultSet> {
        let Some(entry) = self.results.get_mut(slot) else {
            tracing::error!(
                slot,
                slots = self.results.len(),
                "attempted to read a query holder slot that does not exist"
            );
            return None;
        };
        entry.take()
    }

    /// Run every occupied slot in order against one connection, storing
    /// the results in place.
    pub(crate) fn execute_on<T: Connection>(&mut self, connection: &mut T) {
        for (query, result) in self.queries.iter_mut().zip(self.results.iter_mut()) {
            *result = match query.take() {
                Some(HolderQuery::Raw(sql)) => connection.query(&sql),
                Some(HolderQuery::Prepared(stmt)) => connection.query_prepared(&stmt),
                None => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use quern_driver::PreparedStatement;

    use super::*;

    #[test]
    fn test_slots_start_empty() {
        let mut holder = QueryHolder::new(3);
        assert_eq!(holder.slot_count(), 3);
        for slot in 0..3 {
            assert!(holder.result(slot).is_none());
        }
    }

    #[test]
    fn test_out_of_range_slot_is_rejected() {
        let mut holder = QueryHolder::new(1);
        assert!(holder.set_query(0, "SELECT 1"));
        assert!(!holder.set_query(1, "SELECT 2"));
        assert!(!holder.set_prepared_query(5, PreparedStatement::new(0u32.into(), 0)));
        assert!(holder.result(9).is_none());
    }

    #[test]
    fn test_zero_slot_holder() {
        let holder = QueryHolder::new(0);
        assert_eq!(holder.slot_count(), 0);
    }
}
