use tiberius::Query;

use crate::driver::BoundParams;
use crate::error::SqlClientError;
use crate::types::RowValues;

/// Bind one value onto `query`, in marker order.
fn bind_value(query: &mut Query<'_>, value: &RowValues) {
    match value {
        RowValues::Int(i) => query.bind(*i),
        RowValues::Float(f) => query.bind(*f),
        RowValues::Text(s) => query.bind(s.clone()),
        RowValues::Bool(b) => query.bind(*b),
        RowValues::Timestamp(dt) => query.bind(*dt),
        RowValues::Null => query.bind(Option::<String>::None),
        RowValues::JSON(jsval) => query.bind(jsval.to_string()),
        RowValues::Blob(bytes) => query.bind(bytes.clone()),
    }
}

/// Build a tiberius query with the record's values bound to `@P1..@Pn`.
///
/// # Errors
/// Returns `SqlClientError::ParameterError` for a named record.
pub fn bind_query_params<'a>(
    sql: &'a str,
    params: &BoundParams,
) -> Result<Query<'a>, SqlClientError> {
    let BoundParams::Positional(values) = params else {
        return Err(SqlClientError::ParameterError(
            "SQL Server binds positional `@Pn` parameters only".into(),
        ));
    };
    let mut query = Query::new(sql);
    for value in values {
        bind_value(&mut query, value);
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn named_records_are_rejected() {
        let mut map = IndexMap::new();
        map.insert("id".to_string(), RowValues::Int(1));
        assert!(matches!(
            bind_query_params("select @P1", &BoundParams::Named(map)),
            Err(SqlClientError::ParameterError(_))
        ));
    }

    #[test]
    fn positional_records_bind() {
        let record = BoundParams::Positional(vec![RowValues::Int(1), RowValues::Null]);
        assert!(bind_query_params("select @P1, @P2", &record).is_ok());
    }
}
