//! Statement execution.
//!
//! [`Executor`] is the public entry point: it classifies a statement,
//! translates it, checks out a session (connecting lazily on first use), runs
//! it and reduces engine failures to a stable code. The raw engine message,
//! the SQL and the parameter values are only ever written to the log.

mod transaction;

pub use transaction::Transaction;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, error, warn};

use crate::config::ExecutorConfig;
use crate::core::{RowSet, Scalar};
use crate::dialect::{
    param_name, Binding, BoundQuery, PaginationDefaults, StatementKind, Translation, Translator,
};
use crate::error::{CompatError, EngineErrorCode, EngineFailure, Result};
use crate::pool::{ConnectionManager, Session};

/// Identity lookup issued after an insert, on the same session.
///
/// `@@IDENTITY` rather than `SCOPE_IDENTITY()`: parameterised statements run
/// inside `sp_executesql`, a separate scope from this follow-up batch.
///
/// `@@IDENTITY` is the last identity generated on the connection in any
/// scope. If the target table has an insert trigger that writes to another
/// table with an identity column, the reported id is the trigger's row, not
/// the inserted one. Tables with such triggers should return the key with an
/// `OUTPUT INSERTED.<column>` clause through [`Executor::query`] instead.
pub const IDENTITY_QUERY: &str = "SELECT CAST(@@IDENTITY AS BIGINT) AS id";

/// Outcome of a write statement.
///
/// Serializes as `{ "id", "lastID", "changes" }`, with `id` and `lastID`
/// carrying the same identity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteResult {
    pub generated_id: Option<i64>,
    pub rows_affected: u64,
}

impl WriteResult {
    pub fn id(&self) -> Option<i64> {
        self.generated_id
    }

    pub fn last_id(&self) -> Option<i64> {
        self.generated_id
    }

    pub fn changes(&self) -> u64 {
        self.rows_affected
    }
}

impl Serialize for WriteResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("WriteResult", 3)?;
        s.serialize_field("id", &self.generated_id)?;
        s.serialize_field("lastID", &self.generated_id)?;
        s.serialize_field("changes", &self.rows_affected)?;
        s.end()
    }
}

/// Rows for reads, a [`WriteResult`] for writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Rows(RowSet),
    Write(WriteResult),
}

impl From<RowSet> for ExecutionResult {
    fn from(rows: RowSet) -> Self {
        ExecutionResult::Rows(rows)
    }
}

impl From<WriteResult> for ExecutionResult {
    fn from(result: WriteResult) -> Self {
        ExecutionResult::Write(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Idle,
    Connecting,
    Executing,
    ReadComplete,
    IdentityLookup,
    WriteComplete,
    Failed,
}

/// Per-call state machine, traced at DEBUG.
struct StateTrace {
    state: ExecState,
}

impl StateTrace {
    fn new() -> Self {
        Self {
            state: ExecState::Idle,
        }
    }

    fn to(&mut self, next: ExecState) {
        debug!(from = ?self.state, to = ?next, "executor state");
        self.state = next;
    }

    fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.to(ExecState::Failed);
        }
        self.to(ExecState::Idle);
        result
    }
}

/// Translating statement executor over a [`ConnectionManager`].
pub struct Executor<M: ConnectionManager> {
    manager: Arc<M>,
    translator: Translator,
    config: ExecutorConfig,
}

impl<M: ConnectionManager> Clone for Executor<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            translator: self.translator.clone(),
            config: self.config.clone(),
        }
    }
}

impl<M: ConnectionManager> Executor<M> {
    /// Create an executor. Does not connect.
    pub fn new(manager: Arc<M>, config: ExecutorConfig) -> Self {
        let defaults = PaginationDefaults {
            limit: config.default_limit,
            offset: config.default_offset,
        };
        Self {
            manager,
            translator: Translator::new(Default::default(), defaults),
            config,
        }
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Run the translation pipeline without touching the database.
    pub fn translate(
        &self,
        sql: &str,
        params: &[Scalar],
        kind: StatementKind,
    ) -> Result<Translation> {
        self.translator.translate(sql, params, kind)
    }

    /// Run a read statement and return its rows.
    pub async fn query(&self, sql: &str, params: &[Scalar]) -> Result<RowSet> {
        let mut trace = StateTrace::new();
        let result = self.query_inner(&mut trace, sql, params).await;
        trace.finish(result)
    }

    /// Run a write statement. Inserts also report the generated identity.
    pub async fn run(&self, sql: &str, params: &[Scalar]) -> Result<WriteResult> {
        let mut trace = StateTrace::new();
        let result = self.run_inner(&mut trace, sql, params).await;
        trace.finish(result)
    }

    /// Call a stored procedure with named parameters, bypassing translation.
    ///
    /// `procedure` may be schema-qualified (`dbo.GetStories`). Names are
    /// validated and bracket-quoted; values are always bound.
    pub async fn execute(&self, procedure: &str, params: &[(&str, Scalar)]) -> Result<RowSet> {
        let query = procedure_call(procedure, params)?;

        let mut trace = StateTrace::new();
        let result = self.execute_inner(&mut trace, &query).await;
        trace.finish(result)
    }

    /// Run `f` inside a transaction on a single session.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or when
    /// the commit itself fails. A failed rollback is logged and the original
    /// error is returned. A session dropped mid-transaction is reset by the
    /// pool's checkout validation.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<M::Session>) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        let session = self.checkout().await?;
        let mut tx = Transaction::begin(session, self.config.log_sql_max_len).await?;

        let outcome = match f(&mut tx).await {
            Ok(value) => tx.commit().await.map(|()| value),
            Err(e) => Err(e),
        };
        if outcome.is_err() && tx.is_open() {
            if let Err(rollback) = tx.rollback().await {
                error!("Rollback failed after transaction error: {}", rollback);
            }
        }
        outcome
    }

    async fn query_inner(
        &self,
        trace: &mut StateTrace,
        sql: &str,
        params: &[Scalar],
    ) -> Result<RowSet> {
        let kind = StatementKind::classify(sql, false);
        let translation = self.translator.translate(sql, params, kind)?;

        trace.to(ExecState::Connecting);
        let session = self.checkout().await?;

        trace.to(ExecState::Executing);
        let rows = match self.config.query_timeout() {
            Some(limit) => self.fetch_with_timeout(session, translation.bound, limit).await?,
            None => {
                let mut session = session;
                session
                    .fetch(&translation.bound)
                    .await
                    .map_err(|e| self.engine_error(e, &translation.bound))?
            }
        };

        trace.to(ExecState::ReadComplete);
        Ok(rows)
    }

    async fn run_inner(
        &self,
        trace: &mut StateTrace,
        sql: &str,
        params: &[Scalar],
    ) -> Result<WriteResult> {
        let kind = StatementKind::classify(sql, true);
        let translation = self.translator.translate(sql, params, kind)?;

        trace.to(ExecState::Connecting);
        let mut session = self.checkout().await?;

        trace.to(ExecState::Executing);
        let rows_affected = session
            .execute(&translation.bound)
            .await
            .map_err(|e| self.engine_error(e, &translation.bound))?;

        let generated_id = if kind == StatementKind::Insert {
            trace.to(ExecState::IdentityLookup);
            let lookup = BoundQuery::unbound(IDENTITY_QUERY);
            let rows = session
                .fetch(&lookup)
                .await
                .map_err(|e| self.engine_error(e, &lookup))?;
            let id = rows
                .first()
                .and_then(|row| row.get("id"))
                .and_then(Scalar::as_i64);
            if id.is_none() {
                warn!("Identity lookup after insert returned no value");
            }
            id
        } else {
            None
        };

        trace.to(ExecState::WriteComplete);
        Ok(WriteResult {
            generated_id,
            rows_affected,
        })
    }

    async fn execute_inner(&self, trace: &mut StateTrace, query: &BoundQuery) -> Result<RowSet> {
        trace.to(ExecState::Connecting);
        let mut session = self.checkout().await?;

        trace.to(ExecState::Executing);
        let rows = session
            .fetch(query)
            .await
            .map_err(|e| self.engine_error(e, query))?;

        trace.to(ExecState::ReadComplete);
        Ok(rows)
    }

    /// Race a read against `limit`. On expiry the read keeps running on its
    /// own task and its session is returned to the pool when it finishes.
    async fn fetch_with_timeout(
        &self,
        mut session: M::Session,
        query: BoundQuery,
        limit: Duration,
    ) -> Result<RowSet> {
        let task_query = query.clone();
        let handle = tokio::spawn(async move { session.fetch(&task_query).await });

        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(result)) => result.map_err(|e| self.engine_error(e, &query)),
            Ok(Err(join)) => Err(self.engine_error(
                EngineFailure::new(EngineErrorCode::EngineFailure, join.to_string()),
                &query,
            )),
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    sql = %truncate_sql(&query.text, self.config.log_sql_max_len),
                    "Query timed out"
                );
                Err(CompatError::QueryTimeout(limit))
            }
        }
    }

    async fn checkout(&self) -> Result<M::Session> {
        self.ensure_connected().await?;
        self.manager.session().await
    }

    /// Connect the manager if no pool is established yet.
    pub async fn ensure_connected(&self) -> Result<()> {
        if !self.manager.is_connected() {
            self.manager.connect().await?;
        }
        Ok(())
    }

    fn engine_error(&self, failure: EngineFailure, query: &BoundQuery) -> CompatError {
        engine_error(failure, query, self.config.log_sql_max_len)
    }
}

/// Log the full failure and return only its code.
pub(crate) fn engine_error(failure: EngineFailure, query: &BoundQuery, max_len: usize) -> CompatError {
    let params: Vec<String> = query
        .bindings
        .iter()
        .map(|b| format!("@{}={}", b.name, b.value))
        .collect();
    error!(
        code = failure.code.as_str(),
        number = failure.number,
        sql = %truncate_sql(&query.text, max_len),
        params = ?params,
        "Statement failed: {}",
        failure.message
    );
    CompatError::Engine(failure.code)
}

/// Cut `sql` to at most `max_len` characters for logging.
pub fn truncate_sql(sql: &str, max_len: usize) -> Cow<'_, str> {
    match sql.char_indices().nth(max_len) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &sql[..cut])),
        None => Cow::Borrowed(sql),
    }
}

/// Check that `name` is a plain identifier: a letter or underscore followed
/// by letters, digits or underscores.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(CompatError::InvalidIdentifier(name.to_string()))
    }
}

/// Bracket-quote a possibly schema-qualified object name.
pub fn quote_object_name(name: &str) -> Result<String> {
    let parts = name
        .split('.')
        .map(|part| validate_identifier(part).map(|p| format!("[{}]", p)))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("."))
}

/// Turn `(name, value)` pairs into bindings named after the caller's names.
pub(crate) fn named_bindings(params: &[(&str, Scalar)]) -> Result<Vec<Binding>> {
    params
        .iter()
        .map(|(name, value)| {
            let name = validate_identifier(name.trim_start_matches('@'))?;
            Ok(Binding {
                name: name.to_string(),
                value: value.clone(),
            })
        })
        .collect()
}

fn procedure_call(procedure: &str, params: &[(&str, Scalar)]) -> Result<BoundQuery> {
    let target = quote_object_name(procedure)?;
    let named = named_bindings(params)?;

    let mut text = format!("EXEC {}", target);
    let mut bindings = Vec::with_capacity(named.len());
    for (i, binding) in named.into_iter().enumerate() {
        let local = param_name(i);
        text.push_str(if i == 0 { " " } else { ", " });
        text.push_str(&format!("@{} = @{}", binding.name, local));
        bindings.push(Binding {
            name: local,
            value: binding.value,
        });
    }

    Ok(BoundQuery { text, bindings })
}
