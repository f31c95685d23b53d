//! Row-based task leases: claim a batch of rows inside a locked transaction, then resolve each
//! claimed row as done, failed or cancelled.
//!
//! A task table carries a key, a `tried` counter, optionally a `finished` flag and a `next_time`
//! epoch column. Claiming flips `tried` to a sentinel (its negation by default) so concurrent
//! workers skip the row; resolving restores it.
//!
//! ```rust,no_run
//! use sql_client::prelude::*;
//!
//! # async fn work(client: &mut SqlClient<SqliteConnector>) -> Result<(), SqlClientError> {
//! let jobs = TaskTable::new("jobs").with_tried_field("tried").with_finished_field("finished");
//! let claimed = client.claim_tasks(&jobs, ClaimOptions::default().limit(10)).await?;
//! if !claimed.is_empty() {
//!     client.end_tasks(&claimed, &jobs).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod claim;
mod resolve;

pub use claim::ClaimOptions;
pub use resolve::{Outcome, ResolveOverrides};

use std::sync::LazyLock;

use regex::Regex;

use crate::args::{Argument, Record};
use crate::error::SqlClientError;
use crate::sql_builder::{Segment, Sql};
use crate::types::RowValues;

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(>|<|=|!=|between\b)").expect("comparison pattern compiles")
});

static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*=").expect("assignment pattern compiles"));

/// Shape of a task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTable {
    pub name: String,
    /// Columns identifying a row; used to mark exactly the claimed rows.
    pub key_fields: Vec<String>,
    /// Returned by a claim but never used to match rows.
    pub extra_fields: Vec<String>,
    pub tried_field: Option<String>,
    pub finished_field: Option<String>,
    pub next_time_field: Option<String>,
}

impl TaskTable {
    /// A table keyed by `id` with no lease columns enabled.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_fields: vec!["id".to_string()],
            extra_fields: Vec::new(),
            tried_field: None,
            finished_field: None,
            next_time_field: None,
        }
    }

    #[must_use]
    pub fn with_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_extra_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tried_field(mut self, field: impl Into<String>) -> Self {
        self.tried_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_finished_field(mut self, field: impl Into<String>) -> Self {
        self.finished_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_next_time_field(mut self, field: impl Into<String>) -> Self {
        self.next_time_field = Some(field.into());
        self
    }
}

/// Raw comparison appended to a column name, e.g. `>= 3` or `between 1 and 9`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison(String);

impl Comparison {
    /// # Errors
    /// Returns `SqlClientError::ConfigError` unless `text` starts with `>`, `<`, `=`, `!=` or
    /// `between`.
    pub fn new(text: impl Into<String>) -> Result<Self, SqlClientError> {
        let text = text.into();
        if COMPARISON.is_match(&text) {
            Ok(Self(text))
        } else {
            Err(SqlClientError::ConfigError(format!(
                "`{text}` is not a comparison"
            )))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw assignment appended to a column name, e.g. `=tried+2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment(String);

impl Assignment {
    /// # Errors
    /// Returns `SqlClientError::ConfigError` unless `text` starts with `=`.
    pub fn new(text: impl Into<String>) -> Result<Self, SqlClientError> {
        let text = text.into();
        if ASSIGNMENT.is_match(&text) {
            Ok(Self(text))
        } else {
            Err(SqlClientError::ConfigError(format!(
                "`{text}` is not an assignment"
            )))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Condition on the tried or finished column of a claim.
#[derive(Debug, Clone, PartialEq)]
pub enum TriedFilter {
    Any,
    IsNull,
    Equals(RowValues),
    Between(i64, i64),
    Expr(Comparison),
}

/// Condition on the next-time column of a claim; times are epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeFilter {
    Any,
    IsNull,
    /// `<= now`, or never scheduled.
    Due,
    /// `<= now + secs`.
    DueIn(i64),
    /// `<= epoch`.
    At(i64),
    Expr(Comparison),
}

/// New value for a counter column.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterUpdate {
    Keep,
    /// `f = -f`
    Negate,
    /// `f = f + 1`
    Increment,
    /// `f = -f + 1`
    NegateIncrement,
    Set(RowValues),
    Expr(Assignment),
}

/// New value for the next-time column.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeUpdate {
    Keep,
    /// `now + secs`
    After(i64),
    Set(RowValues),
    Expr(Assignment),
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A statement under construction: identifiers and raw SQL kept verbatim, values bound as `%s`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Statement {
    sql: Sql,
    args: Vec<RowValues>,
}

impl Statement {
    pub(crate) fn text(mut self, text: impl Into<String>) -> Self {
        self.sql.push(Segment::Verbatim(text.into()));
        self
    }

    pub(crate) fn bind(mut self, value: impl Into<RowValues>) -> Self {
        self.sql.push(Segment::Raw("%s".to_string()));
        self.args.push(value.into());
        self
    }

    pub(crate) fn append(mut self, other: Statement) -> Self {
        self.sql.append(other.sql);
        self.args.extend(other.args);
        self
    }

    /// Join `parts` with `sep`; `None` when there are none.
    pub(crate) fn join(parts: Vec<Statement>, sep: &str) -> Option<Statement> {
        let mut parts = parts.into_iter();
        let first = parts.next()?;
        Some(parts.fold(first, |acc, part| acc.text(sep).append(part)))
    }

    pub(crate) fn into_parts(self) -> (Sql, Argument) {
        let args = Argument::Sequence(self.args.into_iter().map(Argument::Scalar).collect());
        (self.sql, args)
    }
}

impl TriedFilter {
    pub(crate) fn predicate(&self, field: &str) -> Option<Statement> {
        let s = Statement::default().text(field);
        match self {
            TriedFilter::Any => None,
            TriedFilter::IsNull => Some(s.text(" is null")),
            TriedFilter::Equals(value) => Some(s.text("=").bind(value.clone())),
            TriedFilter::Between(min, max) => {
                Some(s.text(" between ").bind(*min).text(" and ").bind(*max))
            }
            TriedFilter::Expr(expr) => Some(s.text(" ").text(expr.as_str().trim_start())),
        }
    }
}

impl TimeFilter {
    pub(crate) fn predicate(&self, field: &str, now: i64) -> Option<Statement> {
        let s = Statement::default().text(field);
        match self {
            TimeFilter::Any => None,
            TimeFilter::IsNull => Some(s.text(" is null")),
            TimeFilter::Due => Some(
                Statement::default()
                    .text("(")
                    .append(s.text("<=").bind(now))
                    .text(format!(" or {field} is null)")),
            ),
            TimeFilter::DueIn(secs) => Some(s.text("<=").bind(now + secs)),
            TimeFilter::At(epoch) => Some(s.text("<=").bind(*epoch)),
            TimeFilter::Expr(expr) => Some(s.text(" ").text(expr.as_str().trim_start())),
        }
    }
}

impl CounterUpdate {
    pub(crate) fn assignment(&self, field: &str) -> Option<Statement> {
        let s = Statement::default().text(field);
        match self {
            CounterUpdate::Keep => None,
            CounterUpdate::Negate => Some(s.text(format!("=-{field}"))),
            CounterUpdate::Increment => Some(s.text(format!("={field}+1"))),
            CounterUpdate::NegateIncrement => Some(s.text(format!("=-{field}+1"))),
            CounterUpdate::Set(value) => Some(s.text("=").bind(value.clone())),
            CounterUpdate::Expr(expr) => Some(s.text(expr.as_str().trim_start())),
        }
    }
}

impl TimeUpdate {
    pub(crate) fn assignment(&self, field: &str, now: i64) -> Option<Statement> {
        let s = Statement::default().text(field);
        match self {
            TimeUpdate::Keep => None,
            TimeUpdate::After(secs) => Some(s.text("=").bind(now + secs)),
            TimeUpdate::Set(value) => Some(s.text("=").bind(value.clone())),
            TimeUpdate::Expr(expr) => Some(s.text(expr.as_str().trim_start())),
        }
    }
}

/// `k1=%s and k2=%s or k1=%s and k2=%s ...`, one group per record.
pub(crate) fn key_match(
    key_fields: &[String],
    records: &[Record],
) -> Result<Statement, SqlClientError> {
    let mut groups = Vec::with_capacity(records.len());
    for record in records {
        let mut terms = Vec::with_capacity(key_fields.len());
        for (i, key) in key_fields.iter().enumerate() {
            let value = match record {
                Record::Named(map) => map.get(key),
                Record::Positional(values) => values.get(i),
            }
            .ok_or_else(|| {
                SqlClientError::NormalizationError(format!("task row has no key field `{key}`"))
            })?;
            terms.push(Statement::default().text(format!("{key}=")).bind(value.clone()));
        }
        groups.extend(Statement::join(terms, " and "));
    }
    Statement::join(groups, " or ")
        .ok_or_else(|| SqlClientError::ConfigError("no key fields to match task rows".into()))
}

/// Caller `where` override with or without its leading keyword.
pub(crate) fn strip_where(clause: &str) -> &str {
    let trimmed = clause.trim_start();
    match trimmed.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("where") => trimmed[5..].trim_start(),
        _ => trimmed,
    }
}

/// `update <table> set <set> where <where><extra>`.
pub(crate) struct UpdateParts<'a> {
    pub(crate) table: &'a str,
    pub(crate) assignments: Vec<Statement>,
    pub(crate) set_extra: Option<&'a str>,
    pub(crate) update_set: Option<&'a str>,
    pub(crate) update_where: Option<&'a str>,
    pub(crate) update_extra: Option<&'a str>,
}

impl UpdateParts<'_> {
    pub(crate) fn build(self, key_fields: &[String], records: &[Record]) -> Result<Statement, SqlClientError> {
        let set = match self.update_set {
            Some(set) => Statement::default().text(set),
            None => {
                let joined = Statement::join(self.assignments, ",");
                match (joined, self.set_extra) {
                    (Some(set), Some(extra)) => set.text(extra),
                    (Some(set), None) => set,
                    (None, Some(extra)) => {
                        Statement::default().text(extra.trim_start_matches([',', ' ']))
                    }
                    (None, None) => {
                        return Err(SqlClientError::ConfigError(format!(
                            "nothing to update on {}",
                            self.table
                        )));
                    }
                }
            }
        };
        let filter = match self.update_where {
            Some(clause) => Statement::default().text(strip_where(clause)),
            None => key_match(key_fields, records)?,
        };
        let mut stmt = Statement::default()
            .text(format!("update {} set ", self.table))
            .append(set)
            .text(" where ")
            .append(filter);
        if let Some(extra) = self.update_extra {
            stmt = stmt.text(extra);
        }
        Ok(stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(stmt: Statement) -> (String, Vec<RowValues>) {
        (stmt.sql.to_string(), stmt.args)
    }

    #[test]
    fn expressions_are_validated() {
        assert!(Comparison::new(">= 3").is_ok());
        assert!(Comparison::new(" BETWEEN 1 and 4").is_ok());
        assert!(Comparison::new("; drop table jobs").is_err());
        assert!(Comparison::new("betweenx").is_err());
        assert!(Assignment::new("=tried+2").is_ok());
        assert!(Assignment::new("tried+2").is_err());
    }

    #[test]
    fn filters_bind_their_values() {
        let (sql, args) = render(TriedFilter::Between(1, 5).predicate("tried").unwrap());
        assert_eq!(sql, "tried between %s and %s");
        assert_eq!(args, vec![RowValues::Int(1), RowValues::Int(5)]);

        let (sql, args) = render(TimeFilter::Due.predicate("next_time", 100).unwrap());
        assert_eq!(sql, "(next_time<=%s or next_time is null)");
        assert_eq!(args, vec![RowValues::Int(100)]);

        assert!(TriedFilter::Any.predicate("tried").is_none());
        let (sql, _) = render(
            TriedFilter::Expr(Comparison::new("<0").unwrap())
                .predicate("tried")
                .unwrap(),
        );
        assert_eq!(sql, "tried <0");
    }

    #[test]
    fn counter_updates() {
        let (sql, args) = render(CounterUpdate::NegateIncrement.assignment("tried").unwrap());
        assert_eq!(sql, "tried=-tried+1");
        assert!(args.is_empty());
        let (sql, args) = render(TimeUpdate::After(300).assignment("next_time", 1_000).unwrap());
        assert_eq!(sql, "next_time=%s");
        assert_eq!(args, vec![RowValues::Int(1_300)]);
    }

    #[test]
    fn key_match_ors_anded_keys() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let rows = vec![
            Record::Positional(vec![1.into(), 2.into()]),
            Record::Positional(vec![3.into(), 4.into()]),
        ];
        let (sql, args) = render(key_match(&keys, &rows).unwrap());
        assert_eq!(sql, "a=%s and b=%s or a=%s and b=%s");
        assert_eq!(args.len(), 4);

        let named = vec![Record::Named([("a".to_string(), RowValues::Int(1))].into_iter().collect())];
        assert!(matches!(
            key_match(&keys, &named),
            Err(SqlClientError::NormalizationError(_))
        ));
    }

    #[test]
    fn update_overrides() {
        let parts = UpdateParts {
            table: "jobs",
            assignments: vec![CounterUpdate::Negate.assignment("tried").unwrap()],
            set_extra: Some(",owner='w1'"),
            update_set: None,
            update_where: Some("where id in (1, 2)"),
            update_extra: None,
        };
        let (sql, args) = render(parts.build(&[], &[]).unwrap());
        assert_eq!(sql, "update jobs set tried=-tried,owner='w1' where id in (1, 2)");
        assert!(args.is_empty());
    }
}
