use indexmap::IndexMap;

use crate::args::{Argument, KeyPolicy, NormalizeOptions, Record, normalize};
use crate::config::ClientConfig;
use crate::dialect::Dialect;
use crate::driver::Connector;
use crate::error::SqlClientError;
use crate::results::{Chunks, ResultSet};
use crate::retry::{RetryOverrides, RetryPolicy};
use crate::sql_builder::Sql;
use crate::translation::{
    ParamStyle, TargetStyle, interpolate, numeric_remap, render, render_count,
};
use crate::types::RowValues;

use super::{Op, SqlClient};

/// How a batch of records is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchMode {
    /// One `execute_many` call for the whole batch.
    #[default]
    Together,
    /// One call per record; a failing record does not stop the others.
    OneByOne,
}

/// Per-call options for [`QueryBuilder`]. Unset fields fall back to the client's config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub batch_mode: BatchMode,
    /// Treat `{}` in the statement as slots for the column list and the placeholder list.
    pub auto_format: bool,
    /// Field names used for auto-format and for converting records between named and
    /// positional form.
    pub keys: Option<Vec<String>>,
    /// Commit after the statement when autocommit is off.
    pub commit: Option<bool>,
    pub escape_auto_format: Option<bool>,
    pub empty_string_to_none: Option<bool>,
    /// Bind style sent to the driver; defaults to the dialect's.
    pub target_style: Option<ParamStyle>,
    pub retry: RetryOverrides,
}

impl QueryOptions {
    #[must_use]
    pub fn batch_mode(mut self, batch_mode: BatchMode) -> Self {
        self.batch_mode = batch_mode;
        self
    }

    #[must_use]
    pub fn one_by_one(self) -> Self {
        self.batch_mode(BatchMode::OneByOne)
    }

    #[must_use]
    pub fn auto_format(mut self, auto_format: bool) -> Self {
        self.auto_format = auto_format;
        self
    }

    /// Field names, either as an iterator or a comma-separated string.
    #[must_use]
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keys = Some(
            keys.into_iter()
                .flat_map(|k| {
                    k.as_ref()
                        .split(',')
                        .map(|part| part.trim().to_string())
                        .collect::<Vec<_>>()
                })
                .filter(|k| !k.is_empty())
                .collect(),
        );
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
    pub fn target_style(mut self, style: ParamStyle) -> Self {
        self.target_style = Some(style);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn raise_error(mut self, raise_error: bool) -> Self {
        self.retry = self.retry.raise_error(raise_error);
        self
    }
}

/// A statement ready to send: final SQL plus its normalized records.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub(crate) sql: String,
    pub(crate) batch: Vec<Record>,
    pub(crate) is_batch: bool,
    /// Statement in a style the literal renderer understands.
    log_sql: String,
    log_style: Option<ParamStyle>,
}

impl Prepared {
    /// The statement with `record` inlined as literals.
    pub(crate) fn render_literal(&self, record: Option<&Record>) -> String {
        interpolate(&self.log_sql, self.log_style, record)
    }

    pub(crate) fn describe(&self, record: Option<&Record>) -> String {
        format!("formatted_query: {}", self.render_literal(record))
    }
}

/// Normalize `args` for `sql` and rewrite `sql` into the driver's bind style.
pub(crate) fn prepare(
    dialect: &Dialect,
    config: &ClientConfig,
    sql: &Sql,
    args: Option<Argument>,
    options: &QueryOptions,
) -> Result<Prepared, SqlClientError> {
    let target = options.target_style.unwrap_or(dialect.paramstyle);
    let target_style = dialect.style(target);
    let sql = if options.auto_format {
        sql.expand_slots()?
    } else {
        sql.clone()
    };

    // the target style doubles as the detection hint
    let from = sql.detect(Some(target));
    let names = match from {
        Some(style) if style.is_keyed() => sql.placeholder_names(style),
        _ => Vec::new(),
    };

    let keys = options
        .keys
        .clone()
        .or_else(|| {
            options
                .auto_format
                .then(|| args.as_ref().and_then(first_mapping_keys))
                .flatten()
        })
        .or_else(|| derived_keys(from, target, &names));
    let remap = (from == Some(ParamStyle::Numeric) && target.is_positional())
        .then(|| numeric_remap(&names))
        .flatten();

    let mut norm = NormalizeOptions::default()
        .with_empty_string_to_none(
            options
                .empty_string_to_none
                .unwrap_or(config.empty_string_to_none),
        )
        .with_key_policy(if target.binds_by_name() {
            KeyPolicy::ToMapping
        } else {
            KeyPolicy::ToSequence
        })
        .with_positional_remap(remap);
    if let Some(keys) = &keys {
        norm = norm.with_keys(keys.iter().cloned());
    }
    let normalized = normalize(args, &norm)?;

    let sql = if options.auto_format {
        let escape = options
            .escape_auto_format
            .unwrap_or(config.escape_auto_format);
        let (columns, values) = auto_format_parts(
            dialect,
            target_style,
            keys.as_deref(),
            normalized.first(),
            escape,
        );
        sql.fill(&columns, &values)
    } else {
        sql
    };

    let translated = sql.translate(from, target_style);
    let (log_sql, log_style) = if target == ParamStyle::Numeric
        && target_style.numeric_prefix != ":"
    {
        // `$1` and `@P1` are not markers the literal renderer scans for
        (
            sql.translate(from, TargetStyle::new(ParamStyle::Numeric)).sql,
            Some(ParamStyle::Numeric),
        )
    } else {
        (translated.sql.clone(), Some(target))
    };

    Ok(Prepared {
        sql: translated.sql,
        batch: normalized.batch,
        is_batch: normalized.is_batch,
        log_sql,
        log_style,
    })
}

fn first_mapping_keys(args: &Argument) -> Option<Vec<String>> {
    match args {
        Argument::Mapping(map) => Some(map.keys().cloned().collect()),
        Argument::Sequence(items) => match items.first() {
            Some(Argument::Mapping(map)) => Some(map.keys().cloned().collect()),
            _ => None,
        },
        Argument::Scalar(_) => None,
    }
}

/// Keys implied by the statement's own markers.
fn derived_keys(from: Option<ParamStyle>, target: ParamStyle, names: &[String]) -> Option<Vec<String>> {
    let from = from?;
    if target.binds_by_name() {
        // numeric markers bind generated "1".."N" keys
        from.binds_by_name().then(|| {
            let mut unique: Vec<String> = Vec::with_capacity(names.len());
            for name in names {
                if !unique.contains(name) {
                    unique.push(name.clone());
                }
            }
            unique
        })
    } else {
        from.is_keyed().then(|| names.to_vec())
    }
}

fn auto_format_parts(
    dialect: &Dialect,
    target: TargetStyle,
    keys: Option<&[String]>,
    first: Option<&Record>,
    escape: bool,
) -> (String, String) {
    let column = |name: &str| {
        if escape {
            dialect.quote_identifier(name)
        } else {
            name.to_string()
        }
    };
    match (keys, first) {
        (Some(keys), _) => (
            format!(
                "({})",
                keys.iter().map(|k| column(k)).collect::<Vec<_>>().join(",")
            ),
            render(keys, target).join(","),
        ),
        (None, Some(Record::Named(map))) => {
            let fields: Vec<&String> = map.keys().collect();
            (String::new(), render(&fields, target).join(","))
        }
        (None, Some(Record::Positional(values))) => {
            (String::new(), render_count(values.len(), target).join(","))
        }
        (None, None) => (String::new(), String::new()),
    }
}

/// A statement bound to a client, built by [`SqlClient::query`].
///
/// ```rust,no_run
/// # use sql_client::prelude::*;
/// # async fn demo(client: &mut SqlClient<SqliteConnector>) -> Result<(), SqlClientError> {
/// let rows = client
///     .query("select id, name from users where id = %s")
///     .args(7)
///     .select()
///     .await?;
/// let inserted = client
///     .query("insert into users{} values({})")
///     .args(vec![Argument::named([("id", 8)]), Argument::named([("id", 9)])])
///     .options(QueryOptions::default().auto_format(true))
///     .execute()
///     .await?;
/// # let _ = (rows, inserted);
/// # Ok(())
/// # }
/// ```
pub struct QueryBuilder<'a, C: Connector> {
    client: &'a mut SqlClient<C>,
    sql: Sql,
    args: Option<Argument>,
    options: QueryOptions,
}

impl<'a, C: Connector> QueryBuilder<'a, C> {
    pub(crate) fn new(client: &'a mut SqlClient<C>, sql: Sql) -> Self {
        Self {
            client,
            sql,
            args: None,
            options: QueryOptions::default(),
        }
    }

    #[must_use]
    pub fn args(mut self, args: impl Into<Argument>) -> Self {
        self.args = Some(args.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    async fn prepare(
        self,
    ) -> Result<(&'a mut SqlClient<C>, Prepared, QueryOptions, RetryPolicy), SqlClientError> {
        let QueryBuilder {
            client,
            sql,
            args,
            options,
        } = self;
        client.settle().await;
        client.check_scope()?;
        let prepared = prepare(&client.dialect, &client.config, &sql, args, &options)?;
        let policy = options.retry.resolve(&client.config.retry);
        Ok((client, prepared, options, policy))
    }

    /// Run for effect and return the affected row count.
    ///
    /// A batch sent together counts its records; records sent one by one add up their
    /// individual counts.
    ///
    /// # Errors
    /// Returns normalization and configuration errors, and execution errors when the retry
    /// policy raises; otherwise failures count as `0`.
    pub async fn execute(self) -> Result<usize, SqlClientError> {
        let (client, prepared, options, policy) = self.prepare().await?;
        let commit = options.commit.unwrap_or(false);
        let empty = Record::Positional(Vec::new());
        if prepared.batch.is_empty() {
            return client
                .run_count(&prepared, Op::Execute(&empty), commit, policy)
                .await;
        }
        match (options.batch_mode, prepared.is_batch) {
            (BatchMode::Together, true) => {
                client
                    .run_count(&prepared, Op::ExecuteMany(&prepared.batch), commit, policy)
                    .await
            }
            (BatchMode::Together, false) => {
                client
                    .run_count(&prepared, Op::Execute(&prepared.batch[0]), commit, policy)
                    .await
            }
            (BatchMode::OneByOne, _) => {
                let mut total = 0;
                for record in &prepared.batch {
                    total += client
                        .run_count(&prepared, Op::Execute(record), commit, policy)
                        .await?;
                }
                Ok(total)
            }
        }
    }

    /// Fetch rows, one result set per record.
    ///
    /// # Errors
    /// As for [`QueryBuilder::execute`]; failures yield an empty result set.
    pub async fn select_each(self) -> Result<Vec<ResultSet>, SqlClientError> {
        let (client, prepared, options, policy) = self.prepare().await?;
        let commit = options.commit.unwrap_or(false);
        if prepared.batch.is_empty() {
            let empty = Record::Positional(Vec::new());
            let rows = client
                .run_rows(&prepared, Op::Fetch(&empty), commit, policy)
                .await?;
            return Ok(vec![rows]);
        }
        let mut out = Vec::with_capacity(prepared.batch.len());
        for record in &prepared.batch {
            out.push(
                client
                    .run_rows(&prepared, Op::Fetch(record), commit, policy)
                    .await?,
            );
        }
        Ok(out)
    }

    /// Fetch rows; a batch's result sets are concatenated.
    ///
    /// # Errors
    /// As for [`QueryBuilder::select_each`].
    pub async fn select(self) -> Result<ResultSet, SqlClientError> {
        let mut sets = self.select_each().await?.into_iter();
        let mut merged = sets.next().unwrap_or_default();
        for set in sets {
            merged.extend(set);
        }
        Ok(merged)
    }

    /// Fetch rows and hand them out in pages of `chunksize`.
    ///
    /// The whole result is read before the first page; a failed fetch yields no pages.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` for a zero `chunksize`, otherwise as for
    /// [`QueryBuilder::select`].
    pub async fn select_chunks(self, chunksize: usize) -> Result<Chunks, SqlClientError> {
        if chunksize == 0 {
            return Err(SqlClientError::ConfigError("chunksize must be positive".into()));
        }
        Ok(self.select().await?.into_chunks(chunksize))
    }

    /// Fetch rows as column-name maps.
    ///
    /// # Errors
    /// As for [`QueryBuilder::select`].
    pub async fn select_maps(self) -> Result<Vec<IndexMap<String, RowValues>>, SqlClientError> {
        Ok(self.select().await?.to_maps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prep(dialect: &Dialect, sql: &str, args: Option<Argument>, options: QueryOptions) -> Prepared {
        prepare(dialect, &ClientConfig::default(), &Sql::from(sql), args, &options).unwrap()
    }

    #[test]
    fn format_to_numeric_for_postgres() {
        let p = prep(
            &Dialect::postgres(),
            "select * from t where a = %s and b = %s",
            Some((1, "x").into()),
            QueryOptions::default(),
        );
        assert_eq!(p.sql, "select * from t where a = $1 and b = $2");
        assert_eq!(p.batch, vec![Record::Positional(vec![1.into(), "x".into()])]);
        assert_eq!(p.render_literal(p.batch.first()), "select * from t where a = 1 and b = 'x'");
    }

    #[test]
    fn named_mapping_to_qmark_follows_marker_order() {
        let p = prep(
            &Dialect::sqlite(),
            "update t set a = :a where id = :id and a <> :a",
            Some(Argument::named([("id", 3), ("a", 9)])),
            QueryOptions::default(),
        );
        assert_eq!(p.sql, "update t set a = ? where id = ? and a <> ?");
        assert_eq!(
            p.batch,
            vec![Record::Positional(vec![9.into(), 3.into(), 9.into()])]
        );
    }

    #[test]
    fn positional_args_gain_marker_names_for_named_targets() {
        let p = prep(
            &Dialect::oracle(),
            "select * from t where a = :a and b = :b",
            Some((1, 2).into()),
            QueryOptions::default(),
        );
        assert_eq!(p.sql, "select * from t where a = :a and b = :b");
        let Record::Named(map) = &p.batch[0] else {
            panic!("expected a named record");
        };
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn out_of_order_numeric_is_remapped() {
        let p = prep(
            &Dialect::sqlite(),
            "insert into t(b, a) values(:2, :1)",
            Some(("a", "b").into()),
            QueryOptions::default(),
        );
        assert_eq!(p.sql, "insert into t(b, a) values(?, ?)");
        assert_eq!(p.batch, vec![Record::Positional(vec!["b".into(), "a".into()])]);
    }

    #[test]
    fn auto_format_from_mappings_uses_first_record_keys() {
        let args: Argument = vec![
            Argument::named([("a", 1), ("b", 2)]),
            Argument::named([("b", 4), ("a", 3)]),
        ]
        .into();
        let p = prep(
            &Dialect::postgres(),
            "insert into t{} values({})",
            Some(args),
            QueryOptions::default().auto_format(true).escape_auto_format(true),
        );
        assert_eq!(p.sql, "insert into t(\"a\",\"b\") values($1,$2)");
        assert!(p.is_batch);
        assert_eq!(
            p.batch,
            vec![
                Record::Positional(vec![1.into(), 2.into()]),
                Record::Positional(vec![3.into(), 4.into()]),
            ]
        );
    }

    #[test]
    fn auto_format_from_sequences_has_no_column_list() {
        let p = prep(
            &Dialect::mssql(),
            "insert into t{} values({})",
            Some((1, 2, 3).into()),
            QueryOptions::default().auto_format(true),
        );
        assert_eq!(p.sql, "insert into t values(@P1,@P2,@P3)");
    }

    #[test]
    fn empty_strings_become_null_by_default() {
        let p = prep(&Dialect::sqlite(), "insert into t values(?, ?)", Some(("", "x").into()), QueryOptions::default());
        assert_eq!(p.batch, vec![Record::Positional(vec![RowValues::Null, "x".into()])]);
        let p = prep(
            &Dialect::sqlite(),
            "insert into t values(?, ?)",
            Some(("", "x").into()),
            QueryOptions::default().empty_string_to_none(false),
        );
        assert_eq!(p.batch, vec![Record::Positional(vec!["".into(), "x".into()])]);
    }

    #[test]
    fn escapes_are_stripped_without_args() {
        let p = prep(&Dialect::sqlite(), r"select 'a' \? 1", None, QueryOptions::default());
        assert_eq!(p.sql, "select 'a' ? 1");
        assert!(p.batch.is_empty());
    }

    #[test]
    fn keys_accept_comma_separated_strings() {
        let opts = QueryOptions::default().keys(["a, b", "c"]);
        assert_eq!(opts.keys, Some(vec!["a".into(), "b".into(), "c".into()]));
    }
}
