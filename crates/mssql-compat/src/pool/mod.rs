//! Connection management.
//!
//! The executor talks to the database only through these two traits, so it
//! can run against the pooled SQL Server implementation in [`mssql`] or an
//! in-memory stand-in under test.
//!
//! A [`Session`] is one checked-out connection. Statements issued on the same
//! session run on the same server connection, which is what makes the
//! insert + identity lookup pair safe under concurrency.

pub mod mssql;

#[cfg(test)]
pub(crate) mod scripted;

use std::time::Duration;

use async_trait::async_trait;

pub use mssql::{MssqlManager, MssqlSession, TiberiusConnectionManager};

use crate::core::Row;
use crate::dialect::BoundQuery;
use crate::error::{EngineFailure, Result};

/// Result type for raw session calls, before redaction.
pub type SessionResult<T> = std::result::Result<T, EngineFailure>;

/// A checked-out connection.
#[async_trait]
pub trait Session: Send {
    /// Run a statement and return its first result set.
    async fn fetch(&mut self, query: &BoundQuery) -> SessionResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, query: &BoundQuery) -> SessionResult<u64>;

    /// Run a parameterless batch, discarding any results.
    async fn batch(&mut self, sql: &str) -> SessionResult<()>;
}

/// Owner of the process-wide connection pool.
///
/// Constructing a manager must not open connections; [`connect`](Self::connect)
/// does, and must be safe to call concurrently and repeatedly.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Whether the pool is currently established.
    fn is_connected(&self) -> bool;

    /// Establish the pool if it is not already established.
    async fn connect(&self) -> Result<()>;

    /// Check out a session. Fails if the pool is not connected.
    async fn session(&self) -> Result<Self::Session>;

    /// Close the pool, waiting up to `grace` for checked-out sessions.
    ///
    /// A later [`connect`](Self::connect) builds a fresh pool.
    async fn close(&self, grace: Duration) -> Result<()>;
}
