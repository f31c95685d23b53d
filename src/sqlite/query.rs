use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::SqlClientError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlClientError` if the value cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, SqlClientError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Bind `params`, run the statement and collect every row.
///
/// # Errors
/// Returns `SqlClientError` if binding, stepping or extraction fails.
pub fn build_result_set(
    stmt: &mut Statement<'_>,
    params: &Params,
) -> Result<ResultSet, SqlClientError> {
    params.bind(stmt)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }
    Ok(result_set)
}

/// Bind and run a statement for its effect.
///
/// Statements that produce rows report how many they produced.
///
/// # Errors
/// Returns `SqlClientError` if binding or execution fails.
pub fn execute_statement(
    stmt: &mut Statement<'_>,
    params: &Params,
) -> Result<usize, SqlClientError> {
    if stmt.column_count() > 0 {
        return build_result_set(stmt, params).map(|rs| rs.len());
    }
    params.bind(stmt)?;
    Ok(stmt.raw_execute()?)
}
