//! In-memory connection manager for executor tests.
//!
//! Records every statement with the id of the session that ran it and replays
//! queued results in order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ConnectionManager, Session, SessionResult};
use crate::core::{Row, Scalar};
use crate::dialect::BoundQuery;
use crate::error::{CompatError, EngineFailure, Result};
use crate::executor::IDENTITY_QUERY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Fetch,
    Execute,
    Batch,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub session: usize,
    pub kind: CallKind,
    pub query: BoundQuery,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    fetches: VecDeque<SessionResult<Vec<Row>>>,
    executes: VecDeque<SessionResult<u64>>,
    identity: Option<i64>,
    delay: Option<Duration>,
    batch_failures: HashMap<String, EngineFailure>,
    close_failure: Option<String>,
    close_delay: Option<Duration>,
}

#[derive(Default)]
pub(crate) struct ScriptedManager {
    script: Arc<Mutex<Script>>,
    gate: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    connects: AtomicUsize,
    sessions: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.lock().fetches.push_back(Ok(rows));
    }

    pub fn push_fetch_error(&self, failure: EngineFailure) {
        self.lock().fetches.push_back(Err(failure));
    }

    pub fn push_affected(&self, rows: u64) {
        self.lock().executes.push_back(Ok(rows));
    }

    pub fn push_execute_error(&self, failure: EngineFailure) {
        self.lock().executes.push_back(Err(failure));
    }

    /// Value returned by the identity lookup. `None` yields zero rows.
    pub fn set_identity(&self, id: Option<i64>) {
        self.lock().identity = id;
    }

    /// Delay applied to every fetch.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Fail the next batch whose text is `sql`.
    pub fn fail_batch(&self, sql: &str, failure: EngineFailure) {
        self.lock().batch_failures.insert(sql.to_string(), failure);
    }

    /// Make every close fail with `message`.
    pub fn fail_close(&self, message: &str) {
        self.lock().close_failure = Some(message.to_string());
    }

    /// Time a close takes before it completes. A close given less grace
    /// gives up after the grace period.
    pub fn set_close_delay(&self, delay: Duration) {
        self.lock().close_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl ConnectionManager for ScriptedManager {
    type Session = ScriptedSession;

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        tokio::task::yield_now().await;
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn session(&self) -> Result<ScriptedSession> {
        let id = self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            id,
            script: self.script.clone(),
        })
    }

    async fn close(&self, grace: Duration) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        let (failure, delay) = {
            let script = self.lock();
            (script.close_failure.clone(), script.close_delay)
        };
        if let Some(delay) = delay {
            if delay > grace {
                tokio::time::sleep(grace).await;
                return Err(CompatError::pool("close timed out", "closing pool"));
            }
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(CompatError::pool(message, "closing pool")),
            None => Ok(()),
        }
    }
}

pub(crate) struct ScriptedSession {
    id: usize,
    script: Arc<Mutex<Script>>,
}

impl ScriptedSession {
    fn record(&self, kind: CallKind, query: BoundQuery) {
        self.script.lock().unwrap().calls.push(Call {
            session: self.id,
            kind,
            query,
        });
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn fetch(&mut self, query: &BoundQuery) -> SessionResult<Vec<Row>> {
        self.record(CallKind::Fetch, query.clone());

        let delay = self.script.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        if query.text == IDENTITY_QUERY {
            let columns: Arc<[String]> = Arc::from(vec!["id".to_string()]);
            return Ok(script
                .identity
                .map(|id| vec![Row::new(columns, vec![Scalar::Int(id)])])
                .unwrap_or_default());
        }
        script.fetches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn execute(&mut self, query: &BoundQuery) -> SessionResult<u64> {
        self.record(CallKind::Execute, query.clone());
        self.script
            .lock()
            .unwrap()
            .executes
            .pop_front()
            .unwrap_or(Ok(1))
    }

    async fn batch(&mut self, sql: &str) -> SessionResult<()> {
        self.record(CallKind::Batch, BoundQuery::unbound(sql));
        match self.script.lock().unwrap().batch_failures.remove(sql) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}
