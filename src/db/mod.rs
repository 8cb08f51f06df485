//! Database layer for the task tree.

pub mod milestones;
pub mod nodes;

pub use nodes::NodeStore;

use crate::config::StoreConfig;
use crate::error::{TreeError, TreeResult};
use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use tracing::debug;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Fixed set of connections to one SQLite database.
///
/// Each call checks out one connection for its duration. With several
/// connections in WAL mode, readers proceed while a writer holds its
/// transaction; writers are serialized by SQLite itself.
struct Pool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
    /// Longest a checkout waits for a free connection.
    wait: Duration,
}

impl Pool {
    /// Check out a free connection, polling until `wait` elapses. A single
    /// in-memory connection is held for a whole call, so this bounds how long
    /// callers queue behind it.
    fn checkout(&self) -> TreeResult<MutexGuard<'_, Connection>> {
        let deadline = Instant::now() + self.wait;
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let len = self.conns.len();
        loop {
            for offset in 0..len {
                match self.conns[(start + offset) % len].try_lock() {
                    Ok(conn) => return Ok(conn),
                    // A poisoned connection is still usable; its open
                    // transaction was rolled back on unwind.
                    Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                    Err(TryLockError::WouldBlock) => {}
                }
            }
            if Instant::now() >= deadline {
                return Err(TreeError::store_busy(format!(
                    "no connection free within {} ms",
                    self.wait.as_millis()
                )));
            }
            std::thread::sleep(CHECKOUT_POLL);
        }
    }
}

const CHECKOUT_POLL: Duration = Duration::from_millis(1);

/// Database handle over a pool of SQLite connections.
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool>,
}

impl Database {
    /// Open or create the database at the given path with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &StoreConfig::default())
    }

    /// Open or create the database at the given path.
    pub fn open_with<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let size = config.pool_size.max(1);
        let mut conns = Vec::with_capacity(size);

        for _ in 0..size {
            let conn = Connection::open(path)?;

            // WAL lets readers see the last committed snapshot while a
            // writer is mid-transaction.
            conn.execute_batch(&format!(
                "PRAGMA journal_mode=WAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout={};",
                config.busy_timeout_ms
            ))?;

            conns.push(conn);
        }

        debug!(path = %path.display(), connections = size, "opened task database");
        Self::from_connections(conns, config)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(&StoreConfig::default())
    }

    /// Open an in-memory database with explicit store settings. Only the
    /// busy timeout applies; in-memory databases use one connection.
    pub fn open_in_memory_with(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::from_connections(vec![conn], config)
    }

    fn from_connections(mut conns: Vec<Connection>, config: &StoreConfig) -> Result<Self> {
        embedded::migrations::runner().run(&mut conns[0])?;

        Ok(Self {
            pool: Arc::new(Pool {
                conns: conns.into_iter().map(Mutex::new).collect(),
                next: AtomicUsize::new(0),
                wait: Duration::from_millis(config.busy_timeout_ms),
            }),
        })
    }

    /// Execute a function with exclusive access to one pooled connection.
    pub fn with_conn<F, T>(&self, f: F) -> TreeResult<T>
    where
        F: FnOnce(&Connection) -> TreeResult<T>,
    {
        let conn = self.pool.checkout()?;
        f(&conn)
    }

    /// Execute a function with mutable access to one pooled connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> TreeResult<T>
    where
        F: FnOnce(&mut Connection) -> TreeResult<T>,
    {
        let mut conn = self.pool.checkout()?;
        f(&mut conn)
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
