//! Explicit transactions on a single checked-out session.

use tracing::debug;

use super::{engine_error, named_bindings};
use crate::core::{RowSet, Scalar};
use crate::dialect::BoundQuery;
use crate::error::Result;
use crate::pool::Session;

/// A session with an open transaction.
///
/// Statements are target-dialect SQL with `@name` parameters; they are not
/// translated.
pub struct Transaction<S: Session> {
    session: S,
    log_sql_max_len: usize,
    statements: usize,
    open: bool,
}

impl<S: Session> Transaction<S> {
    pub(crate) async fn begin(session: S, log_sql_max_len: usize) -> Result<Self> {
        let mut tx = Self {
            session,
            log_sql_max_len,
            statements: 0,
            open: true,
        };
        tx.batch("BEGIN TRANSACTION").await?;
        debug!("transaction started");
        Ok(tx)
    }

    /// Run a statement and return its rows.
    pub async fn query(&mut self, sql: &str, params: &[(&str, Scalar)]) -> Result<RowSet> {
        let query = BoundQuery {
            text: sql.to_string(),
            bindings: named_bindings(params)?,
        };
        self.statements += 1;
        self.session
            .fetch(&query)
            .await
            .map_err(|e| engine_error(e, &query, self.log_sql_max_len))
    }

    /// Run a statement and return the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[(&str, Scalar)]) -> Result<u64> {
        let query = BoundQuery {
            text: sql.to_string(),
            bindings: named_bindings(params)?,
        };
        self.statements += 1;
        self.session
            .execute(&query)
            .await
            .map_err(|e| engine_error(e, &query, self.log_sql_max_len))
    }

    /// Whether neither commit nor rollback has completed.
    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    /// Commit. On failure the transaction stays open for a rollback.
    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT TRANSACTION").await?;
        self.open = false;
        debug!(statements = self.statements, "transaction committed");
        Ok(())
    }

    pub(crate) async fn rollback(mut self) -> Result<()> {
        self.batch("ROLLBACK TRANSACTION").await?;
        debug!(statements = self.statements, "transaction rolled back");
        Ok(())
    }

    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.session
            .batch(sql)
            .await
            .map_err(|e| engine_error(e, &BoundQuery::unbound(sql), self.log_sql_max_len))
    }
}
