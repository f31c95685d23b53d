//! Bounded retry around one statement execution.
//!
//! Connectivity failures are retried after a pause, reconnecting first; any other failure rolls
//! the open transaction back and ends the call. Whether an exhausted or failed call surfaces its
//! error or degrades to an empty result is decided by [`RetryPolicy::raise_error`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SqlClientError;

/// Resolved retry settings for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts before giving up on connectivity errors; `0` retries forever.
    pub max_attempts: u32,
    pub sleep_between: Duration,
    /// Return the error instead of an empty result, both on exhaustion and on statement errors.
    pub raise_error: bool,
    /// Reconnect before the next attempt after a connectivity error.
    pub try_reconnect: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            sleep_between: Duration::from_secs(3),
            raise_error: false,
            try_reconnect: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_sleep_between(mut self, sleep_between: Duration) -> Self {
        self.sleep_between = sleep_between;
        self
    }

    #[must_use]
    pub fn with_raise_error(mut self, raise_error: bool) -> Self {
        self.raise_error = raise_error;
        self
    }

    #[must_use]
    pub fn with_try_reconnect(mut self, try_reconnect: bool) -> Self {
        self.try_reconnect = try_reconnect;
        self
    }
}

/// Per-call overrides; unset fields fall back to the client's policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub sleep_between: Option<Duration>,
    pub raise_error: Option<bool>,
}

impl RetryOverrides {
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn sleep_between(mut self, sleep_between: Duration) -> Self {
        self.sleep_between = Some(sleep_between);
        self
    }

    #[must_use]
    pub fn raise_error(mut self, raise_error: bool) -> Self {
        self.raise_error = Some(raise_error);
        self
    }

    #[must_use]
    pub fn resolve(&self, defaults: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            sleep_between: self.sleep_between.unwrap_or(defaults.sleep_between),
            raise_error: self.raise_error.unwrap_or(defaults.raise_error),
            try_reconnect: defaults.try_reconnect,
        }
    }
}

/// The connection-facing half of a retried call.
#[async_trait]
pub trait Lifecycle: Send {
    /// Returned in place of an error when the policy does not raise.
    type Output: Default + Send;

    /// One try: execute, optionally commit, then fetch or count.
    async fn attempt(&mut self) -> Result<Self::Output, SqlClientError>;

    /// Drop the current connection and open a fresh one.
    async fn reconnect(&mut self) -> Result<(), SqlClientError>;

    async fn rollback(&mut self) -> Result<(), SqlClientError>;

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool;

    /// The statement as it should appear in log lines.
    fn describe(&self) -> String;
}

/// Runs a [`Lifecycle`] under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `call` to success, exhaustion or a statement failure.
    ///
    /// # Errors
    /// Caller errors (normalization, configuration) are always returned. Connectivity errors
    /// past the attempt cap and statement errors are returned only when `raise_error` is set;
    /// otherwise the call yields `L::Output::default()`.
    pub async fn run<L: Lifecycle>(&self, call: &mut L) -> Result<L::Output, SqlClientError> {
        let mut attempts: u32 = 0;
        let mut reconnect_pending = false;
        loop {
            let result = if reconnect_pending {
                match call.reconnect().await {
                    Ok(()) => {
                        reconnect_pending = false;
                        call.attempt().await
                    }
                    Err(err) => Err(err),
                }
            } else {
                call.attempt().await
            };

            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };
            if err.is_caller_error() {
                return Err(err);
            }

            if call.is_connectivity_error(&err) {
                attempts += 1;
                if self.policy.max_attempts != 0 && attempts >= self.policy.max_attempts {
                    tracing::error!(
                        "max retry({}): {}  {}",
                        attempts,
                        err,
                        call.describe()
                    );
                    return self.give_up(err);
                }
                tracing::warn!(
                    "retry({}), sleep {:?}: {}  {}",
                    attempts,
                    self.policy.sleep_between,
                    err,
                    call.describe()
                );
                if !self.policy.sleep_between.is_zero() {
                    tokio::time::sleep(self.policy.sleep_between).await;
                }
                reconnect_pending = self.policy.try_reconnect;
                continue;
            }

            if let Err(rollback_err) = call.rollback().await {
                tracing::error!("rollback failed: {}", rollback_err);
            }
            tracing::error!("{}  {}", err, call.describe());
            return self.give_up(err);
        }
    }

    fn give_up<T: Default>(&self, err: SqlClientError) -> Result<T, SqlClientError> {
        if self.policy.raise_error {
            Err(err)
        } else {
            Ok(T::default())
        }
    }
}
