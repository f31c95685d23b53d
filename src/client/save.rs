use crate::args::Argument;
use crate::driver::Connector;
use crate::error::SqlClientError;
use crate::retry::RetryOverrides;
use crate::sql_builder::{Sql, escape_template};

use super::SqlClient;
use super::query::{BatchMode, QueryOptions};

/// Options for [`SqlClient::save_data`].
///
/// Records are inserted one by one unless `batch_mode` says otherwise, so a bad record is logged
/// and skipped instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    /// Leading statement; defaults to the dialect's (`INSERT INTO`, `INSERT` for SQL Server).
    pub statement: Option<String>,
    /// Appended after `VALUES(...)`, e.g. an `ON CONFLICT` clause.
    pub extra: Option<String>,
    pub batch_mode: BatchMode,
    pub keys: Option<Vec<String>>,
    pub commit: Option<bool>,
    pub escape_auto_format: Option<bool>,
    pub empty_string_to_none: Option<bool>,
    pub retry: RetryOverrides,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            statement: None,
            extra: None,
            batch_mode: BatchMode::OneByOne,
            keys: None,
            commit: None,
            escape_auto_format: None,
            empty_string_to_none: None,
            retry: RetryOverrides::default(),
        }
    }
}

impl SaveOptions {
    #[must_use]
    pub fn statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    #[must_use]
    pub fn extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    #[must_use]
    pub fn batch_mode(mut self, batch_mode: BatchMode) -> Self {
        self.batch_mode = batch_mode;
        self
    }

    /// Send the whole batch in one `execute_many` call.
    #[must_use]
    pub fn together(self) -> Self {
        self.batch_mode(BatchMode::Together)
    }

    #[must_use]
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keys = QueryOptions::default().keys(keys).keys;
        self
    }

    #[must_use]
    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = Some(commit);
        self
    }

    #[must_use]
    pub fn escape_auto_format(mut self, escape: bool) -> Self {
        self.escape_auto_format = Some(escape);
        self
    }

    #[must_use]
    pub fn empty_string_to_none(mut self, on: bool) -> Self {
        self.empty_string_to_none = Some(on);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }

    fn query_options(self) -> QueryOptions {
        QueryOptions {
            batch_mode: self.batch_mode,
            auto_format: true,
            keys: self.keys,
            commit: self.commit,
            escape_auto_format: self.escape_auto_format,
            empty_string_to_none: self.empty_string_to_none,
            target_style: None,
            retry: self.retry,
        }
    }
}

/// `<statement> <table>{} VALUES({})<extra>`, with the table kept out of placeholder scanning.
///
/// Braces in the statement and in `extra` are literal text, not auto-format slots.
pub(crate) fn save_statement(statement: &str, table: &str, extra: Option<&str>) -> Sql {
    let mut sql = Sql::new()
        .raw(format!("{} ", escape_template(statement)))
        .verbatim(table)
        .columns()
        .raw(" VALUES(")
        .values()
        .raw(")");
    if let Some(extra) = extra {
        sql = sql.raw(format!(" {}", escape_template(extra)));
    }
    sql
}

impl<C: Connector> SqlClient<C> {
    /// Insert one record or a batch into `table` (or the configured default table).
    ///
    /// Mapping records supply the column list; positional records must cover every column in
    /// table order unless `options.keys` names them.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` when no table is given or configured, plus the
    /// errors of [`super::QueryBuilder::execute`].
    pub async fn save_data(
        &mut self,
        args: impl Into<Argument>,
        table: Option<&str>,
        options: SaveOptions,
    ) -> Result<usize, SqlClientError> {
        let args = args.into();
        if args.is_empty() {
            return Ok(0);
        }
        let table = table
            .map(str::to_string)
            .or_else(|| self.config.table.clone())
            .ok_or_else(|| SqlClientError::ConfigError("save_data needs a table".into()))?;
        let statement = options
            .statement
            .clone()
            .unwrap_or_else(|| self.dialect.statement_save_data.clone());
        let sql = save_statement(&statement, &table, options.extra.as_deref());
        self.query(sql)
            .args(args)
            .options(options.query_options())
            .execute()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_verbatim_and_extra_is_scanned() {
        let sql = save_statement("INSERT INTO", "odd?table", Some("ON CONFLICT DO NOTHING"));
        assert_eq!(
            sql.to_string(),
            "INSERT INTO odd?table{} VALUES({}) ON CONFLICT DO NOTHING"
        );
        assert!(sql.has_slots());
    }

    #[test]
    fn braces_in_extra_stay_literal() {
        let sql = save_statement(
            "INSERT INTO",
            "t",
            Some("ON CONFLICT (id) DO UPDATE SET j = '{\"a\":1}'"),
        );
        let expanded = sql.expand_slots().unwrap();
        let filled = expanded.fill("(id,j)", "?,?");
        assert_eq!(
            filled.to_string(),
            "INSERT INTO t(id,j) VALUES(?,?) ON CONFLICT (id) DO UPDATE SET j = '{\"a\":1}'"
        );
    }

    #[test]
    fn defaults_insert_one_by_one() {
        let opts = SaveOptions::default();
        assert_eq!(opts.batch_mode, BatchMode::OneByOne);
        assert!(opts.query_options().auto_format);
        assert_eq!(SaveOptions::default().together().batch_mode, BatchMode::Together);
    }
}
