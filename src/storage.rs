//! Storage interface and its SQLite implementation.
//!
//! The engine talks to the store only through [`Storage`]: a bound statement
//! goes in, rows or an affected row count come out. Transaction demarcation
//! belongs to the caller; [`SqliteStorage`] exposes `begin`, `commit` and
//! `rollback` for that purpose.
//!
//! Every statement carries the [`UnitOfWork`] issuing it. While a
//! `PessimisticWrite` read holds the write lock of a shared [`SqliteStorage`],
//! statements of any other unit of work wait for the holder to commit or roll
//! back and fail with a lock timeout once the busy timeout has passed.

// used for persistence
use rusqlite::{Connection, params_from_iter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace};

use crate::compile::BoundStatement;
use crate::config::StorageConfig;
use crate::error::{DerivaError, Result, StorageFailure};
use crate::query::{FetchHint, LockMode};
use crate::value::{Row, RowSet, Value};

/// The caller side owner of statements, and of the transaction a
/// `PessimisticWrite` read opens. Each repository gets its own unless several
/// are built with the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitOfWork(u64);

impl UnitOfWork {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Pass-through directives accompanying a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Directives {
    pub lock: LockMode,
    pub hint: FetchHint,
    pub unit: Option<UnitOfWork>,
}

pub trait Storage: Send + Sync {
    fn fetch(&self, statement: &BoundStatement, directives: Directives) -> Result<RowSet>;
    /// Runs an update or delete, returning the number of affected rows.
    fn execute(&self, statement: &BoundStatement, directives: Directives) -> Result<usize>;
}

/// Identity mapping and change tracking live with the caller's unit of work.
/// The engine only reports what it loaded and what a bulk statement made stale.
pub trait PersistenceContext: Send + Sync {
    fn loaded(&self, _entity: &str, _ids: &[Value], _hint: FetchHint) {}
    fn invalidate(&self, _entity: &str) {}
}

/// A context that tracks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Untracked;

impl PersistenceContext for Untracked {}

// ------------- SQLite -------------
struct Session {
    connection: Connection,
    // unit of work whose locking read opened the running transaction
    holder: Option<UnitOfWork>,
}

pub struct SqliteStorage {
    session: Mutex<Session>,
    released: Condvar,
    busy_timeout: Duration,
}

impl SqliteStorage {
    pub fn open_in_memory() -> Result<Self> {
        Self::with(Connection::open_in_memory()?, StorageConfig::default().busy_timeout_ms)
    }
    pub fn open(path: &str) -> Result<Self> {
        Self::with(Connection::open(path)?, StorageConfig::default().busy_timeout_ms)
    }
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let connection = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        Self::with(connection, config.busy_timeout_ms)
    }
    fn with(connection: Connection, busy_timeout_ms: u64) -> Result<Self> {
        let busy_timeout = Duration::from_millis(busy_timeout_ms);
        connection.busy_timeout(busy_timeout)?;
        Ok(Self {
            session: Mutex::new(Session {
                connection,
                holder: None,
            }),
            released: Condvar::new(),
            busy_timeout,
        })
    }
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn session(&self) -> Result<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|e| DerivaError::Lock(format!("storage connection: {e}")))
    }

    /// Waits until no other unit of work holds the write lock.
    fn session_for(&self, unit: Option<UnitOfWork>) -> Result<MutexGuard<'_, Session>> {
        let session = self.session()?;
        let (mut session, waited) = self
            .released
            .wait_timeout_while(session, self.busy_timeout, |s| {
                s.holder.is_some() && !s.connection.is_autocommit() && s.holder != unit
            })
            .map_err(|e| DerivaError::Lock(format!("storage connection: {e}")))?;
        if waited.timed_out() {
            return Err(StorageFailure::LockTimeout("write lock is held by another unit of work".into()).into());
        }
        // ended through raw SQL
        if session.connection.is_autocommit() {
            session.holder = None;
        }
        Ok(session)
    }

    /// Runs setup or seeding SQL, outside of any query definition. Ending a
    /// transaction here releases a held write lock.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let mut session = self.session()?;
        let outcome = session.connection.execute_batch(sql);
        if session.connection.is_autocommit() {
            if let Some(holder) = session.holder.take() {
                debug!(unit = holder.0, "write lock released");
                self.released.notify_all();
            }
        }
        Ok(outcome?)
    }
    pub fn begin(&self) -> Result<()> {
        self.execute_batch("BEGIN")
    }
    pub fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")
    }
    pub fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(!self.session()?.connection.is_autocommit())
    }
}

impl Storage for SqliteStorage {
    fn fetch(&self, statement: &BoundStatement, directives: Directives) -> Result<RowSet> {
        let mut session = self.session_for(directives.unit)?;
        if directives.lock == LockMode::PessimisticWrite && session.connection.is_autocommit() {
            // takes the database write lock, held until the caller commits or rolls back
            debug!("acquiring write lock");
            session.connection.execute_batch("BEGIN IMMEDIATE")?;
            session.holder = directives.unit;
        }
        let mut prepared = session.connection.prepare_cached(&statement.sql)?;
        let columns: Arc<[String]> = prepared
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>()
            .into();
        let mut rows = prepared.query(params_from_iter(statement.values.iter()))?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(Value::from_raw(row.get_ref(i)?)?);
            }
            fetched.push(Row::new(Arc::clone(&columns), values));
        }
        trace!(rows = fetched.len(), "fetched");
        Ok(RowSet::new(columns, fetched))
    }

    fn execute(&self, statement: &BoundStatement, directives: Directives) -> Result<usize> {
        let session = self.session_for(directives.unit)?;
        let mut prepared = session.connection.prepare_cached(&statement.sql)?;
        Ok(prepared.execute(params_from_iter(statement.values.iter()))?)
    }
}
