use rusqlite::Statement;
use rusqlite::types::Value;

use crate::driver::BoundParams;
use crate::error::SqlClientError;
use crate::types::RowValues;

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Owned `SQLite` parameters, ready to move into a blocking task.
#[derive(Debug, Clone)]
pub enum Params {
    Positional(Vec<Value>),
    /// Names without their marker prefix.
    Named(Vec<(String, Value)>),
}

impl Params {
    #[must_use]
    pub fn convert(params: &BoundParams) -> Self {
        match params {
            BoundParams::Positional(values) => {
                Params::Positional(values.iter().map(row_value_to_sqlite_value).collect())
            }
            BoundParams::Named(map) => Params::Named(
                map.iter()
                    .map(|(k, v)| (k.clone(), row_value_to_sqlite_value(v)))
                    .collect(),
            ),
        }
    }

    /// Bind onto a prepared statement.
    ///
    /// Named values are looked up under every prefix `SQLite` accepts (`:`, `@`, `$`, `?`); a
    /// value whose name does not appear in the statement is an error.
    ///
    /// # Errors
    /// Returns `SqlClientError::ParameterError` for a count mismatch or an unknown name, or the
    /// driver error from binding.
    pub fn bind(&self, stmt: &mut Statement<'_>) -> Result<(), SqlClientError> {
        let expected = stmt.parameter_count();
        match self {
            Params::Positional(values) => {
                if values.len() != expected {
                    return Err(SqlClientError::ParameterError(format!(
                        "statement takes {expected} parameters, {} supplied",
                        values.len()
                    )));
                }
                for (idx, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(idx + 1, value)?;
                }
            }
            Params::Named(values) => {
                for (name, value) in values {
                    let idx = [":", "@", "$", "?"]
                        .iter()
                        .find_map(|prefix| {
                            stmt.parameter_index(&format!("{prefix}{name}"))
                                .ok()
                                .flatten()
                        })
                        .ok_or_else(|| {
                            SqlClientError::ParameterError(format!(
                                "statement has no parameter named `{name}`"
                            ))
                        })?;
                    stmt.raw_bind_parameter(idx, value)?;
                }
            }
        }
        Ok(())
    }
}
