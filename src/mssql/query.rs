use std::sync::Arc;

use chrono::NaiveDateTime;
use futures_util::TryStreamExt;
use tiberius::{QueryStream, Row};

use crate::error::SqlClientError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Collect the first result set of a query stream.
///
/// # Errors
/// Returns the driver error from reading columns or rows.
pub async fn build_result_set(mut stream: QueryStream<'_>) -> Result<ResultSet, SqlClientError> {
    let column_names: Vec<String> = stream
        .columns()
        .await?
        .map(|columns| columns.iter().map(|col| col.name().to_string()).collect())
        .unwrap_or_default();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stream.into_row_stream();
    while let Some(row) = rows.try_next().await? {
        let mut row_values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            row_values.push(extract_value(&row, idx));
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Read column `idx`, trying the narrowest matching Rust type first.
///
/// Values of types with no `RowValues` counterpart come back as `Null`.
fn extract_value(row: &Row, idx: usize) -> RowValues {
    if let Ok(Some(val)) = row.try_get::<u8, _>(idx) {
        return RowValues::Int(i64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<i16, _>(idx) {
        return RowValues::Int(i64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return RowValues::Int(i64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return RowValues::Int(val);
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return RowValues::Float(f64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return RowValues::Float(val);
    }
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return RowValues::Bool(val);
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDateTime, _>(idx) {
        return RowValues::Timestamp(val);
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return RowValues::Text(val.to_string());
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return RowValues::Blob(val.to_vec());
    }
    RowValues::Null
}

/// Sum the per-statement counts of an execute result.
///
/// # Errors
/// Returns `SqlClientError::ExecutionError` if the total does not fit in `usize`.
pub fn affected_rows(counts: &[u64]) -> Result<usize, SqlClientError> {
    let total: u64 = counts.iter().sum();
    usize::try_from(total).map_err(|e| {
        SqlClientError::ExecutionError(format!("Invalid rows affected count: {e}"))
    })
}
