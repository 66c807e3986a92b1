//! SQL Server pool built on Tiberius and bb8.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use super::{ConnectionManager, Session, SessionResult};
use crate::config::{DatabaseConfig, PoolConfig};
use crate::core::{Row, Scalar};
use crate::dialect::BoundQuery;
use crate::error::{CompatError, Result};

/// How often `close` re-checks for outstanding sessions.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: DatabaseConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));
        if let Some(ref app_name) = self.config.app_name {
            config.application_name(app_name);
        }

        if self.config.encryption_enabled() {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

/// Checkout validation batch.
pub(crate) const CHECKOUT_RESET: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SELECT 1";

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    /// Runs on every checkout. A connection returned with an open transaction
    /// is rolled back before reuse.
    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query(CHECKOUT_RESET).await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Lazily connected SQL Server pool.
///
/// Built at startup without touching the network. The first caller of
/// [`connect`](ConnectionManager::connect) establishes the pool; concurrent
/// callers wait on the same lock and find it already built.
pub struct MssqlManager {
    database: DatabaseConfig,
    pool_config: PoolConfig,
    pool: RwLock<Option<Pool<TiberiusConnectionManager>>>,
    connected: AtomicBool,
}

impl MssqlManager {
    pub fn new(database: DatabaseConfig, pool_config: PoolConfig) -> Self {
        Self {
            database,
            pool_config,
            pool: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Build a manager from the `database` and `pool` sections.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.database.clone(), config.pool.clone())
    }

    /// Round-trip `SELECT 1` and report the latency, connecting first if needed.
    pub async fn ping(&self) -> Result<Duration> {
        self.connect().await?;
        let started = std::time::Instant::now();
        let mut session = self.session().await?;
        session
            .batch("SELECT 1")
            .await
            .map_err(|e| CompatError::pool(e, "pinging MSSQL"))?;
        Ok(started.elapsed())
    }

    async fn build_pool(&self) -> Result<Pool<TiberiusConnectionManager>> {
        let manager = TiberiusConnectionManager::new(self.database.clone());
        let min_idle = (self.pool_config.min_idle > 0).then_some(self.pool_config.min_idle);
        let pool = Pool::builder()
            .max_size(self.pool_config.max_size)
            .min_idle(min_idle)
            .connection_timeout(self.pool_config.connection_timeout())
            .idle_timeout(Some(self.pool_config.idle_timeout()))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| CompatError::pool(e, "creating MSSQL pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CompatError::pool(e, "testing MSSQL connection"))?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| CompatError::pool(e, "testing MSSQL connection"))?
                .into_row()
                .await
                .map_err(|e| CompatError::pool(e, "testing MSSQL connection"))?;
        }

        Ok(pool)
    }
}

#[async_trait]
impl ConnectionManager for MssqlManager {
    type Session = MssqlSession;

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut guard = self.pool.write().await;
        if guard.is_some() {
            self.connected.store(true, Ordering::Release);
            return Ok(());
        }

        let pool = self.build_pool().await?;
        *guard = Some(pool);
        self.connected.store(true, Ordering::Release);

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            self.database.host, self.database.port, self.database.database, self.pool_config.max_size
        );
        Ok(())
    }

    async fn session(&self) -> Result<MssqlSession> {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or_else(|| CompatError::pool("pool is not connected", "acquiring MSSQL session"))?;

        let conn = pool
            .get_owned()
            .await
            .map_err(|e| CompatError::pool(e, "acquiring MSSQL session"))?;
        Ok(MssqlSession { conn })
    }

    async fn close(&self, grace: Duration) -> Result<()> {
        let pool = {
            let mut guard = self.pool.write().await;
            self.connected.store(false, Ordering::Release);
            guard.take()
        };

        let Some(pool) = pool else {
            debug!("close requested but pool was never connected");
            return Ok(());
        };

        let drained = tokio::time::timeout(grace, async {
            loop {
                let state = pool.state();
                if state.connections == state.idle_connections {
                    break;
                }
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        let state = pool.state();
        drop(pool);

        match drained {
            Ok(()) => {
                info!("MSSQL pool closed");
                Ok(())
            }
            Err(_) => {
                warn!(
                    in_use = state.connections.saturating_sub(state.idle_connections),
                    "MSSQL pool closed with sessions still checked out"
                );
                Err(CompatError::pool(
                    format!("sessions still in use after {}s", grace.as_secs()),
                    "closing MSSQL pool",
                ))
            }
        }
    }
}

/// A checked-out Tiberius connection.
pub struct MssqlSession {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
}

#[async_trait]
impl Session for MssqlSession {
    async fn fetch(&mut self, query: &BoundQuery) -> SessionResult<Vec<Row>> {
        let stream = build_query(query).query(&mut *self.conn).await?;
        let rows = stream.into_first_result().await?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns: Arc<[String]> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(rows
            .into_iter()
            .map(|row| Row::new(columns.clone(), row.into_iter().map(column_to_scalar).collect()))
            .collect())
    }

    async fn execute(&mut self, query: &BoundQuery) -> SessionResult<u64> {
        let result = build_query(query).execute(&mut *self.conn).await?;
        Ok(result.total())
    }

    async fn batch(&mut self, sql: &str) -> SessionResult<()> {
        self.conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }
}

/// Declared SQL type for a bound value's local variable.
fn sql_type(value: &Scalar) -> &'static str {
    match value {
        Scalar::Null | Scalar::Text(_) => "NVARCHAR(MAX)",
        Scalar::Bool(_) => "BIT",
        Scalar::Int(_) => "BIGINT",
        Scalar::Float(_) => "FLOAT",
        Scalar::DateTime(_) => "DATETIME2",
    }
}

/// Prefix the statement with local variables carrying the named bindings.
///
/// Tiberius sends parameters positionally as `@P1..@Pn`; declaring
/// `@paramN = @P(N+1)` keeps the named tokens in the statement text intact.
pub fn with_declarations(query: &BoundQuery) -> String {
    if query.bindings.is_empty() {
        return query.text.clone();
    }

    let declarations = query
        .bindings
        .iter()
        .enumerate()
        .map(|(i, b)| format!("@{} {} = @P{}", b.name, sql_type(&b.value), i + 1))
        .collect::<Vec<_>>()
        .join(", ");

    format!("DECLARE {};\n{}", declarations, query.text)
}

fn build_query(query: &BoundQuery) -> Query<'static> {
    let mut q = Query::new(with_declarations(query));
    for binding in &query.bindings {
        match &binding.value {
            Scalar::Null => q.bind(Option::<String>::None),
            Scalar::Bool(b) => q.bind(*b),
            Scalar::Int(v) => q.bind(*v),
            Scalar::Float(v) => q.bind(*v),
            Scalar::Text(s) => q.bind(s.clone()),
            Scalar::DateTime(dt) => q.bind(*dt),
        }
    }
    q
}

fn column_to_scalar(data: ColumnData<'static>) -> Scalar {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| Scalar::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| Scalar::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| Scalar::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(Scalar::Int),
        ColumnData::F32(v) => v.map(|v| Scalar::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(Scalar::Float),
        ColumnData::Bit(v) => v.map(Scalar::Bool),
        ColumnData::String(v) => v.map(|s| Scalar::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| Scalar::Text(g.to_string())),
        ColumnData::Numeric(v) => v.map(|n| Scalar::Float(f64::from(n))),
        ColumnData::Binary(v) => v.map(|b| Scalar::Text(format!("0x{}", hex::encode_upper(&b)))),
        ColumnData::Xml(v) => v.map(|x| Scalar::Text(x.into_owned().into_string())),
        ref temporal => temporal_to_scalar(temporal),
    };
    value.unwrap_or(Scalar::Null)
}

fn temporal_to_scalar(data: &ColumnData<'static>) -> Option<Scalar> {
    match data {
        ColumnData::Date(_) => NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Scalar::DateTime),
        ColumnData::Time(_) => NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|t| Scalar::Text(t.format("%H:%M:%S%.f").to_string())),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<Utc>::from_sql(data)
            .ok()
            .flatten()
            .map(|dt| Scalar::DateTime(dt.naive_utc())),
        _ => NaiveDateTime::from_sql(data)
            .ok()
            .flatten()
            .map(Scalar::DateTime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Binding;
    use std::borrow::Cow;

    #[test]
    fn test_with_declarations_maps_names_to_positions() {
        let query = BoundQuery {
            text: "SELECT * FROM stories ORDER BY id OFFSET @param0 ROWS FETCH NEXT @param1 ROWS ONLY"
                .to_string(),
            bindings: vec![
                Binding {
                    name: "param0".into(),
                    value: Scalar::Int(0),
                },
                Binding {
                    name: "param1".into(),
                    value: Scalar::Int(10),
                },
            ],
        };
        let sql = with_declarations(&query);
        assert!(sql.starts_with("DECLARE @param0 BIGINT = @P1, @param1 BIGINT = @P2;\n"));
        assert!(sql.ends_with("FETCH NEXT @param1 ROWS ONLY"));
    }

    #[test]
    fn test_with_declarations_types() {
        let query = BoundQuery {
            text: "UPDATE t SET a = @param0, b = @param1, c = @param2".to_string(),
            bindings: vec![
                Binding {
                    name: "param0".into(),
                    value: Scalar::Text("x".into()),
                },
                Binding {
                    name: "param1".into(),
                    value: Scalar::Null,
                },
                Binding {
                    name: "param2".into(),
                    value: Scalar::Float(1.5),
                },
            ],
        };
        let sql = with_declarations(&query);
        assert!(sql.contains("@param0 NVARCHAR(MAX) = @P1"));
        assert!(sql.contains("@param1 NVARCHAR(MAX) = @P2"));
        assert!(sql.contains("@param2 FLOAT = @P3"));
    }

    #[test]
    fn test_with_declarations_unbound_is_unchanged() {
        let query = BoundQuery::unbound("SELECT NEWID() as r");
        assert_eq!(with_declarations(&query), "SELECT NEWID() as r");
    }

    #[test]
    fn test_column_to_scalar_basic_types() {
        assert_eq!(column_to_scalar(ColumnData::I32(Some(42))), Scalar::Int(42));
        assert_eq!(column_to_scalar(ColumnData::U8(Some(3))), Scalar::Int(3));
        assert_eq!(column_to_scalar(ColumnData::Bit(Some(true))), Scalar::Bool(true));
        assert_eq!(column_to_scalar(ColumnData::F64(Some(2.5))), Scalar::Float(2.5));
        assert_eq!(
            column_to_scalar(ColumnData::String(Some(Cow::Borrowed("Acme")))),
            Scalar::Text("Acme".into())
        );
    }

    #[test]
    fn test_column_to_scalar_nulls() {
        assert_eq!(column_to_scalar(ColumnData::I64(None)), Scalar::Null);
        assert_eq!(column_to_scalar(ColumnData::String(None)), Scalar::Null);
        assert_eq!(column_to_scalar(ColumnData::Bit(None)), Scalar::Null);
    }

    #[test]
    fn test_checkout_reset_rolls_back_open_transaction() {
        assert!(CHECKOUT_RESET.starts_with("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;"));
        assert!(CHECKOUT_RESET.ends_with("SELECT 1"));
    }

    #[test]
    fn test_binary_column_is_hex_text() {
        let bytes: &'static [u8] = &[0x00, 0xAB, 0x10];
        assert_eq!(
            column_to_scalar(ColumnData::Binary(Some(Cow::Borrowed(bytes)))),
            Scalar::Text("0x00AB10".into())
        );
        assert_eq!(column_to_scalar(ColumnData::Binary(None)), Scalar::Null);
    }

    #[test]
    fn test_manager_starts_disconnected() {
        let manager = MssqlManager::new(
            DatabaseConfig {
                host: "localhost".into(),
                port: 1433,
                database: "catalog".into(),
                user: "sa".into(),
                password: "pw".into(),
                encrypt: "false".into(),
                trust_server_cert: true,
                app_name: None,
            },
            PoolConfig::default(),
        );
        assert!(!manager.is_connected());
    }
}
