use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::row::{CustomDbRow, index_columns};
use crate::types::RowValues;

/// A result set from a database query
///
/// An empty result set is also the sentinel returned when a fetching call is aborted or runs out
/// of retries without raising.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// The number of rows fetched
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// Create a new result set with a known capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index = Some(Arc::new(index_columns(&column_names)));
        self.column_names = Some(column_names);
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row to the result set. Rows added before column names are set are dropped.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(column_names), Some(index)) = (&self.column_names, &self.column_index) {
            self.results.push(CustomDbRow::with_cache(
                Arc::clone(column_names),
                Arc::clone(index),
                row_values,
            ));
            self.rows_affected += 1;
        }
    }

    /// Add an already-built row.
    pub fn add_row(&mut self, row: CustomDbRow) {
        if self.column_names.is_none() {
            self.set_column_names(Arc::clone(&row.column_names));
        }
        self.results.push(row);
        self.rows_affected += 1;
    }

    /// Append every row of `other`, used to merge one-by-one executions.
    pub fn extend(&mut self, other: ResultSet) {
        for row in other.results {
            self.add_row(row);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Rows as plain value vectors.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<RowValues>> {
        self.results.iter().map(|row| row.rows.clone()).collect()
    }

    /// Rows as column name → value maps.
    #[must_use]
    pub fn to_maps(&self) -> Vec<IndexMap<String, RowValues>> {
        self.results.iter().map(CustomDbRow::to_map).collect()
    }

    /// Split into pages of at most `size` rows (at least one per page).
    #[must_use]
    pub fn into_chunks(self, size: usize) -> Chunks {
        Chunks {
            column_names: self.column_names,
            rows: self.results.into_iter(),
            size: size.max(1),
        }
    }
}

/// Pages of a [`ResultSet`], from [`ResultSet::into_chunks`].
#[derive(Debug)]
pub struct Chunks {
    column_names: Option<Arc<Vec<String>>>,
    rows: std::vec::IntoIter<CustomDbRow>,
    size: usize,
}

impl Chunks {
    /// Rows not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for Chunks {
    type Item = ResultSet;

    fn next(&mut self) -> Option<ResultSet> {
        let mut page = ResultSet::with_capacity(self.size.min(self.rows.len()));
        if let Some(names) = &self.column_names {
            page.set_column_names(Arc::clone(names));
        }
        for row in self.rows.by_ref().take(self.size) {
            page.add_row(row);
        }
        (!page.is_empty()).then_some(page)
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a CustomDbRow;
    type IntoIter = std::slice::Iter<'a, CustomDbRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rows() -> ResultSet {
        let mut rs = ResultSet::with_capacity(2);
        rs.set_column_names(Arc::new(vec!["id".into(), "name".into()]));
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Text("a".into())]);
        rs.add_row_values(vec![RowValues::Int(2), RowValues::Text("b".into())]);
        rs
    }

    #[test]
    fn rows_share_column_lookup() {
        let rs = two_rows();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.results[1].get("name"), Some(&RowValues::Text("b".into())));
        assert_eq!(rs.results[0].get_column_index("id"), Some(0));
        assert!(rs.results[0].get("missing").is_none());
    }

    #[test]
    fn rows_without_columns_are_ignored() {
        let mut rs = ResultSet::default();
        rs.add_row_values(vec![RowValues::Int(1)]);
        assert!(rs.is_empty());
    }

    #[test]
    fn chunks_page_rows_in_order() {
        let mut rs = two_rows();
        rs.extend(two_rows());
        let mut pages = rs.into_chunks(3);
        let first = pages.next().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first.rows_affected, 3);
        assert_eq!(pages.remaining(), 1);
        let last = pages.next().unwrap();
        assert_eq!(last.results[0].get("name"), Some(&RowValues::Text("b".into())));
        assert!(pages.next().is_none());
        assert_eq!(ResultSet::default().into_chunks(0).count(), 0);
    }

    #[test]
    fn extend_merges_per_record_results() {
        let mut merged = ResultSet::default();
        merged.extend(two_rows());
        merged.extend(two_rows());
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.rows_affected, 4);
        let maps = merged.to_maps();
        assert_eq!(maps[3].get("id"), Some(&RowValues::Int(2)));
        assert_eq!(maps[3].keys().collect::<Vec<_>>(), vec!["id", "name"]);
    }
}
