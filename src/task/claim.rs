use crate::args::{NormalizeOptions, normalize};
use crate::client::{QueryOptions, SqlClient};
use crate::dialect::Dialect;
use crate::driver::Connector;
use crate::error::SqlClientError;
use crate::results::ResultSet;
use crate::retry::RetryOverrides;

use super::{
    CounterUpdate, Statement, TaskTable, TimeFilter, TimeUpdate, TriedFilter, UpdateParts, now,
};

/// Options for [`SqlClient::claim_tasks`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOptions {
    /// Rows per claim; `None` or `Some(0)` claims every matching row.
    pub limit: Option<u64>,
    /// Lock the selected rows until the claim commits.
    pub lock: bool,
    pub tried: TriedFilter,
    pub finished: TriedFilter,
    pub next_time: TimeFilter,
    pub tried_after: CounterUpdate,
    pub next_time_after: TimeUpdate,
    /// Autocommit mode to switch to once the claim has committed or rolled back.
    pub autocommit_after: Option<bool>,
    /// Replaces the generated `where` clause; `Some("")` selects without one.
    pub select_where: Option<String>,
    /// Appended after the `where` clause, e.g. ` order by priority desc`.
    pub select_extra: Option<String>,
    /// Replaces the generated `set` list.
    pub update_set: Option<String>,
    /// Appended to the generated `set` list, e.g. `,worker='w1'`.
    pub set_extra: Option<String>,
    /// Replaces the key match of the update.
    pub update_where: Option<String>,
    pub update_extra: Option<String>,
    pub empty_string_to_none: Option<bool>,
    pub retry: RetryOverrides,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            limit: Some(1),
            lock: true,
            tried: TriedFilter::Between(1, 5),
            finished: TriedFilter::Equals(0.into()),
            next_time: TimeFilter::Due,
            tried_after: CounterUpdate::Negate,
            next_time_after: TimeUpdate::Keep,
            autocommit_after: None,
            select_where: None,
            select_extra: None,
            update_set: None,
            set_extra: None,
            update_where: None,
            update_extra: None,
            empty_string_to_none: None,
            retry: RetryOverrides::default(),
        }
    }
}

impl ClaimOptions {
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self
    }

    #[must_use]
    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn tried(mut self, tried: TriedFilter) -> Self {
        self.tried = tried;
        self
    }

    #[must_use]
    pub fn finished(mut self, finished: TriedFilter) -> Self {
        self.finished = finished;
        self
    }

    #[must_use]
    pub fn next_time(mut self, next_time: TimeFilter) -> Self {
        self.next_time = next_time;
        self
    }

    #[must_use]
    pub fn tried_after(mut self, tried_after: CounterUpdate) -> Self {
        self.tried_after = tried_after;
        self
    }

    #[must_use]
    pub fn next_time_after(mut self, next_time_after: TimeUpdate) -> Self {
        self.next_time_after = next_time_after;
        self
    }

    #[must_use]
    pub fn autocommit_after(mut self, autocommit: bool) -> Self {
        self.autocommit_after = Some(autocommit);
        self
    }

    #[must_use]
    pub fn select_where(mut self, clause: impl Into<String>) -> Self {
        self.select_where = Some(clause.into());
        self
    }

    #[must_use]
    pub fn select_extra(mut self, extra: impl Into<String>) -> Self {
        self.select_extra = Some(extra.into());
        self
    }

    #[must_use]
    pub fn update_set(mut self, set: impl Into<String>) -> Self {
        self.update_set = Some(set.into());
        self
    }

    #[must_use]
    pub fn set_extra(mut self, extra: impl Into<String>) -> Self {
        self.set_extra = Some(extra.into());
        self
    }

    #[must_use]
    pub fn update_where(mut self, clause: impl Into<String>) -> Self {
        self.update_where = Some(clause.into());
        self
    }

    #[must_use]
    pub fn update_extra(mut self, extra: impl Into<String>) -> Self {
        self.update_extra = Some(extra.into());
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

    #[must_use]
    pub fn raise_error(mut self, raise_error: bool) -> Self {
        self.retry = self.retry.raise_error(raise_error);
        self
    }

    fn query_options(&self) -> QueryOptions {
        let mut options = QueryOptions::default().commit(false).retry(self.retry);
        options.empty_string_to_none = self.empty_string_to_none;
        options
    }
}

/// The claim `select`, with limit and lock clauses placed the way `dialect` wants them.
pub(crate) fn claim_select(
    dialect: &Dialect,
    table: &TaskTable,
    options: &ClaimOptions,
    now: i64,
) -> Result<Statement, SqlClientError> {
    if table.key_fields.is_empty() {
        return Err(SqlClientError::ConfigError(format!(
            "claiming from {} needs key fields",
            table.name
        )));
    }
    let limit = options.limit.filter(|n| *n > 0);
    let columns = table
        .key_fields
        .iter()
        .chain(&table.extra_fields)
        .cloned()
        .collect::<Vec<_>>()
        .join(",");

    let filter = match options.select_where.as_deref() {
        Some(clause) => {
            let clause = super::strip_where(clause);
            (!clause.is_empty()).then(|| Statement::default().text(clause))
        }
        None => {
            let predicates = [
                table
                    .tried_field
                    .as_deref()
                    .and_then(|f| options.tried.predicate(f)),
                table
                    .finished_field
                    .as_deref()
                    .and_then(|f| options.finished.predicate(f)),
                table
                    .next_time_field
                    .as_deref()
                    .and_then(|f| options.next_time.predicate(f, now)),
            ];
            Statement::join(predicates.into_iter().flatten().collect(), " and ")
        }
    };

    let mut stmt = Statement::default().text(format!(
        "select {}{} from {}{}",
        dialect.limit_prefix(limit),
        columns,
        table.name,
        dialect.lock_hint(options.lock)
    ));
    if let Some(filter) = filter {
        stmt = stmt.text(" where ").append(filter);
    }
    if let Some(extra) = options.select_extra.as_deref() {
        stmt = stmt.text(extra);
    }
    Ok(stmt
        .text(dialect.limit_suffix(limit))
        .text(dialect.lock_suffix(options.lock)))
}

fn claim_update(
    table: &TaskTable,
    options: &ClaimOptions,
    rows: &ResultSet,
    now: i64,
) -> Result<Statement, SqlClientError> {
    let records = normalize(
        Some(rows.into()),
        &NormalizeOptions::default().with_to_batch(Some(true)),
    )?
    .batch;
    let assignments = [
        table
            .tried_field
            .as_deref()
            .and_then(|f| options.tried_after.assignment(f)),
        table
            .next_time_field
            .as_deref()
            .and_then(|f| options.next_time_after.assignment(f, now)),
    ];
    UpdateParts {
        table: &table.name,
        assignments: assignments.into_iter().flatten().collect(),
        set_extra: options.set_extra.as_deref(),
        update_set: options.update_set.as_deref(),
        update_where: options.update_where.as_deref(),
        update_extra: options.update_extra.as_deref(),
    }
    .build(&table.key_fields, &records)
}

impl<C: Connector> SqlClient<C> {
    /// Claim up to `options.limit` rows of `table` for this worker.
    ///
    /// Inside one transaction the matching rows are selected under a lock and marked with
    /// `tried_after` (negated by default). The claim is all or nothing: if the update does not
    /// cover every selected row, the transaction is rolled back and no rows are returned.
    ///
    /// Opening the transaction runs under the same retry policy as the statements, so a database
    /// that stays unreachable yields an empty result unless the policy raises.
    ///
    /// # Errors
    /// Returns configuration errors, `SqlClientError::TransactionError` when a transaction is
    /// already open, and, when the retry policy raises, connection and statement errors and
    /// `SqlClientError::ClaimConflict`.
    pub async fn claim_tasks(
        &mut self,
        table: &TaskTable,
        options: ClaimOptions,
    ) -> Result<ResultSet, SqlClientError> {
        let now = now();
        let (select_sql, select_args) =
            claim_select(self.dialect(), table, &options, now)?.into_parts();
        let policy = options.retry.resolve(&self.config().retry);
        let raise_error = policy.raise_error;

        let Some(scope) = self.begin_with(policy).await? else {
            return Ok(ResultSet::default());
        };
        let claimed = self
            .query(select_sql)
            .args(select_args)
            .options(options.query_options())
            .select()
            .await;
        let rows = match claimed {
            // a swallowed select error leaves the scope aborted
            Ok(rows) if rows.is_empty() && self.scope_aborted() => {
                self.rollback(scope).await?;
                self.restore_autocommit(options.autocommit_after).await?;
                return Ok(rows);
            }
            Ok(rows) if rows.is_empty() => {
                self.commit(scope).await?;
                self.restore_autocommit(options.autocommit_after).await?;
                return Ok(rows);
            }
            Ok(rows) => rows,
            Err(err) => {
                self.rollback(scope).await?;
                self.restore_autocommit(options.autocommit_after).await?;
                return Err(err);
            }
        };

        let marked = match claim_update(table, &options, &rows, now) {
            Ok(update) => {
                let (update_sql, update_args) = update.into_parts();
                self.query(update_sql)
                    .args(update_args)
                    .options(options.query_options())
                    .execute()
                    .await
            }
            Err(err) => Err(err),
        };

        let outcome = match marked {
            Ok(_) if self.scope_aborted() => {
                self.rollback(scope).await?;
                Ok(ResultSet::default())
            }
            Ok(affected) if claim_covered(affected, rows.len(), options.update_where.is_some()) => {
                self.commit(scope).await.map(|()| rows)
            }
            Ok(affected) => {
                tracing::warn!(
                    "claim conflict table={} selected={} marked={}",
                    table.name,
                    rows.len(),
                    affected
                );
                self.rollback(scope).await?;
                if raise_error {
                    Err(SqlClientError::ClaimConflict(format!(
                        "marked {affected} of {} rows in {}",
                        rows.len(),
                        table.name
                    )))
                } else {
                    Ok(ResultSet::default())
                }
            }
            Err(err) => {
                self.rollback(scope).await?;
                Err(err)
            }
        };
        self.restore_autocommit(options.autocommit_after).await?;
        outcome
    }

    async fn restore_autocommit(&mut self, autocommit: Option<bool>) -> Result<(), SqlClientError> {
        match autocommit {
            Some(autocommit) => self.set_autocommit(autocommit).await,
            None => Ok(()),
        }
    }
}

/// Every selected row must be marked; a caller `where` override only has to mark something.
fn claim_covered(affected: usize, selected: usize, custom_where: bool) -> bool {
    if custom_where {
        affected > 0
    } else {
        affected == selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Argument;
    use crate::types::RowValues;

    fn jobs() -> TaskTable {
        TaskTable::new("jobs")
            .with_extra_fields(["payload"])
            .with_tried_field("tried")
            .with_finished_field("finished")
            .with_next_time_field("next_time")
    }

    #[test]
    fn select_per_dialect() {
        let stmt = claim_select(&Dialect::postgres(), &jobs(), &ClaimOptions::default(), 50).unwrap();
        let (sql, args) = stmt.into_parts();
        assert_eq!(
            sql.to_string(),
            "select id,payload from jobs where tried between %s and %s and finished=%s \
             and (next_time<=%s or next_time is null) LIMIT 1 FOR UPDATE"
        );
        let expected: Vec<Argument> = [1, 5, 0, 50]
            .into_iter()
            .map(|v| Argument::Scalar(RowValues::Int(v)))
            .collect();
        assert_eq!(args, Argument::Sequence(expected));

        let stmt = claim_select(
            &Dialect::mssql(),
            &jobs(),
            &ClaimOptions::default().limit(3).next_time(TimeFilter::Any),
            50,
        )
        .unwrap();
        assert_eq!(
            stmt.into_parts().0.to_string(),
            "select TOP 3 id,payload from jobs WITH (UPDLOCK, ROWLOCK) \
             where tried between %s and %s and finished=%s"
        );
    }

    #[test]
    fn sqlite_relies_on_begin_immediate() {
        let stmt = claim_select(
            &Dialect::sqlite(),
            &TaskTable::new("jobs"),
            &ClaimOptions::default().select_where("").unlimited(),
            0,
        )
        .unwrap();
        assert_eq!(stmt.into_parts().0.to_string(), "select id from jobs");
    }

    #[test]
    fn coverage_rule() {
        assert!(claim_covered(2, 2, false));
        assert!(!claim_covered(1, 2, false));
        assert!(claim_covered(1, 2, true));
        assert!(!claim_covered(0, 2, true));
    }
}
