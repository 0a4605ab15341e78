//! Query results

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::facts::Value;

/// One row of a query result, keyed by the query's `select` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    fields: BTreeMap<String, Value>,
}

impl QueryRow {
    pub(crate) fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Read a string field; missing or non-string fields are inference errors.
    pub fn get_str(&self, field: &str) -> Result<&str> {
        match self.fields.get(field) {
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(Error::Inference(format!(
                "query field {field:?} is a {}, expected a string",
                other.type_name()
            ))),
            None => Err(Error::Inference(format!("query has no field {field:?}"))),
        }
    }
}

/// Rows produced by one query, in match order. Consumed once.
#[derive(Debug)]
pub struct QueryResult {
    rows: std::vec::IntoIter<QueryRow>,
}

impl QueryResult {
    pub(crate) fn new(rows: Vec<QueryRow>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for QueryResult {
    type Item = QueryRow;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for QueryResult {}
