use crate::args::{Argument, NormalizeOptions, normalize};
use crate::client::{QueryOptions, SqlClient};
use crate::driver::Connector;
use crate::error::SqlClientError;
use crate::retry::RetryOverrides;

use super::{CounterUpdate, TaskTable, TimeUpdate, UpdateParts, now};

/// How a claimed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `tried=0`, `finished=1`, `next_time=0`.
    Done,
    /// `tried=-tried+1`, `finished=0`, `next_time=now+300`.
    Failed,
    /// `tried=-tried`; the row is left as it was before the claim.
    Cancelled,
}

impl Outcome {
    fn tried(self) -> CounterUpdate {
        match self {
            Outcome::Done => CounterUpdate::Set(0.into()),
            Outcome::Failed => CounterUpdate::NegateIncrement,
            Outcome::Cancelled => CounterUpdate::Negate,
        }
    }

    fn finished(self) -> CounterUpdate {
        match self {
            Outcome::Done => CounterUpdate::Set(1.into()),
            Outcome::Failed => CounterUpdate::Set(0.into()),
            Outcome::Cancelled => CounterUpdate::Keep,
        }
    }

    fn next_time(self) -> TimeUpdate {
        match self {
            Outcome::Done => TimeUpdate::Set(0.into()),
            Outcome::Failed => TimeUpdate::After(300),
            Outcome::Cancelled => TimeUpdate::Keep,
        }
    }
}

/// Per-call changes to an [`Outcome`]'s column values and statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOverrides {
    pub tried: Option<CounterUpdate>,
    pub finished: Option<CounterUpdate>,
    pub next_time: Option<TimeUpdate>,
    /// Key columns; defaults to the table's, then to the first row's columns.
    pub key_fields: Option<Vec<String>>,
    /// Commit when autocommit is off. On by default.
    pub commit: bool,
    pub set_extra: Option<String>,
    pub update_set: Option<String>,
    pub update_where: Option<String>,
    pub update_extra: Option<String>,
    pub empty_string_to_none: Option<bool>,
    pub retry: RetryOverrides,
}

impl Default for ResolveOverrides {
    fn default() -> Self {
        Self {
            tried: None,
            finished: None,
            next_time: None,
            key_fields: None,
            commit: true,
            set_extra: None,
            update_set: None,
            update_where: None,
            update_extra: None,
            empty_string_to_none: None,
            retry: RetryOverrides::default(),
        }
    }
}

impl ResolveOverrides {
    #[must_use]
    pub fn tried(mut self, tried: CounterUpdate) -> Self {
        self.tried = Some(tried);
        self
    }

    #[must_use]
    pub fn finished(mut self, finished: CounterUpdate) -> Self {
        self.finished = Some(finished);
        self
    }

    #[must_use]
    pub fn next_time(mut self, next_time: TimeUpdate) -> Self {
        self.next_time = Some(next_time);
        self
    }

    #[must_use]
    pub fn key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    #[must_use]
    pub fn set_extra(mut self, extra: impl Into<String>) -> Self {
        self.set_extra = Some(extra.into());
        self
    }

    #[must_use]
    pub fn update_set(mut self, set: impl Into<String>) -> Self {
        self.update_set = Some(set.into());
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
}

impl<C: Connector> SqlClient<C> {
    /// Mark claimed `rows` of `table` with the column values of `outcome`.
    ///
    /// Runs a single update matching the rows by their key fields. Only the lease columns the
    /// table declares are touched.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` for finished or next-time overrides on a cancel,
    /// `SqlClientError::NormalizationError` when a row lacks a key field, and statement errors
    /// when the retry policy raises.
    pub async fn resolve_tasks(
        &mut self,
        rows: impl Into<Argument>,
        table: &TaskTable,
        outcome: Outcome,
        overrides: ResolveOverrides,
    ) -> Result<usize, SqlClientError> {
        if outcome == Outcome::Cancelled
            && (overrides.finished.is_some() || overrides.next_time.is_some())
        {
            return Err(SqlClientError::ConfigError(
                "a cancelled task keeps its finished and next-time values".into(),
            ));
        }
        let records = normalize(
            Some(rows.into()),
            &NormalizeOptions::default().with_to_batch(Some(true)),
        )?
        .batch;
        let Some(first) = records.first() else {
            return Ok(0);
        };

        let key_fields = match overrides.key_fields.clone() {
            Some(keys) if !keys.is_empty() => keys,
            _ if !table.key_fields.is_empty() => table.key_fields.clone(),
            _ => first
                .keys()
                .map(|keys| keys.into_iter().map(str::to_string).collect())
                .ok_or_else(|| {
                    SqlClientError::ConfigError(
                        "positional task rows need key fields".into(),
                    )
                })?,
        };

        let now = now();
        let tried = overrides.tried.clone().unwrap_or_else(|| outcome.tried());
        let finished = overrides
            .finished
            .clone()
            .unwrap_or_else(|| outcome.finished());
        let next_time = overrides
            .next_time
            .clone()
            .unwrap_or_else(|| outcome.next_time());
        let assignments = [
            table
                .tried_field
                .as_deref()
                .and_then(|f| tried.assignment(f)),
            table
                .finished_field
                .as_deref()
                .and_then(|f| finished.assignment(f)),
            table
                .next_time_field
                .as_deref()
                .and_then(|f| next_time.assignment(f, now)),
        ];
        let update = UpdateParts {
            table: &table.name,
            assignments: assignments.into_iter().flatten().collect(),
            set_extra: overrides.set_extra.as_deref(),
            update_set: overrides.update_set.as_deref(),
            update_where: overrides.update_where.as_deref(),
            update_extra: overrides.update_extra.as_deref(),
        }
        .build(&key_fields, &records)?;

        let (sql, args) = update.into_parts();
        let mut options = QueryOptions::default()
            .commit(overrides.commit)
            .retry(overrides.retry);
        options.empty_string_to_none = overrides.empty_string_to_none;
        let affected = self.query(sql).args(args).options(options).execute().await?;
        tracing::debug!(
            "resolved tasks table={} outcome={:?} rows={} affected={}",
            table.name,
            outcome,
            records.len(),
            affected
        );
        Ok(affected)
    }

    /// Mark `rows` finished.
    ///
    /// # Errors
    /// As for [`SqlClient::resolve_tasks`].
    pub async fn end_tasks(
        &mut self,
        rows: impl Into<Argument>,
        table: &TaskTable,
    ) -> Result<usize, SqlClientError> {
        self.resolve_tasks(rows, table, Outcome::Done, ResolveOverrides::default())
            .await
    }

    /// Return `rows` to the queue with one more try counted and a five minute backoff.
    ///
    /// # Errors
    /// As for [`SqlClient::resolve_tasks`].
    pub async fn fail_tasks(
        &mut self,
        rows: impl Into<Argument>,
        table: &TaskTable,
    ) -> Result<usize, SqlClientError> {
        self.resolve_tasks(rows, table, Outcome::Failed, ResolveOverrides::default())
            .await
    }

    /// Release `rows` exactly as they were before the claim.
    ///
    /// # Errors
    /// As for [`SqlClient::resolve_tasks`].
    pub async fn cancel_tasks(
        &mut self,
        rows: impl Into<Argument>,
        table: &TaskTable,
    ) -> Result<usize, SqlClientError> {
        self.resolve_tasks(rows, table, Outcome::Cancelled, ResolveOverrides::default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_defaults() {
        assert_eq!(Outcome::Done.tried(), CounterUpdate::Set(0.into()));
        assert_eq!(Outcome::Failed.next_time(), TimeUpdate::After(300));
        assert_eq!(Outcome::Cancelled.finished(), CounterUpdate::Keep);
        assert_eq!(Outcome::Cancelled.next_time(), TimeUpdate::Keep);
    }

    #[test]
    fn overrides_commit_by_default() {
        assert!(ResolveOverrides::default().commit);
        assert!(!ResolveOverrides::default().commit(false).commit);
    }
}
