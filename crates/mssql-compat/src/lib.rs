//! # mssql-compat
//!
//! Run application SQL written for a SQLite-style dialect against Microsoft
//! SQL Server without changing the call sites.
//!
//! Statements keep positional `?` parameters, `LIMIT`/`OFFSET` pagination,
//! `RANDOM()` and `datetime("now")`. On the way to the server they are:
//!
//! - **Rewritten** into T-SQL (`OFFSET … FETCH NEXT`, `TOP(n)`, `NEWID()`,
//!   `GETUTCDATE()`)
//! - **Reindexed** so parameter order matches the rewritten text
//! - **Bound** to named `@paramN` tokens
//! - **Executed** on a lazily connected bb8/Tiberius pool, with the generated
//!   identity returned for inserts and engine errors reduced to stable codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mssql_compat::{Config, Executor, MssqlManager, Scalar};
//!
//! #[tokio::main]
//! async fn main() -> mssql_compat::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let manager = Arc::new(MssqlManager::from_config(&config));
//!     let executor = Executor::new(manager, config.executor.clone());
//!
//!     let stories = executor
//!         .query(
//!             "SELECT * FROM stories ORDER BY createdAt DESC LIMIT ? OFFSET ?",
//!             &[Scalar::Int(10), Scalar::Int(0)],
//!         )
//!         .await?;
//!     println!("{} stories", stories.len());
//!
//!     let created = executor
//!         .run(
//!             "INSERT INTO brands (name, slug, isActive) VALUES (?, ?, ?)",
//!             &["Acme".into(), "acme".into(), Scalar::Bool(true)],
//!         )
//!         .await?;
//!     println!("new brand id: {:?}", created.id());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod pool;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, ExecutorConfig, PoolConfig, ShutdownConfig};
pub use crate::core::{Row, RowSet, Scalar};
pub use dialect::{BoundQuery, StatementKind, Translation, Translator};
pub use error::{CompatError, EngineErrorCode, Result};
pub use executor::{ExecutionResult, Executor, Transaction, WriteResult, IDENTITY_QUERY};
pub use pool::{ConnectionManager, MssqlManager, Session};
