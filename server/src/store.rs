//! MySQL-backed session persistence.
//!
//! One table, `sessions(code PRIMARY KEY, save_state, updated_at)`, written
//! with upsert semantics. Every query retries transient failures with
//! exponential backoff, healing the connection pool in between: the first
//! caller to observe a poisoned pool tears it down and builds a fresh one
//! while concurrent callers wait on the same recreation.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;

const QUERY_ATTEMPTS: u32 = 4;
const POOL_PROBE_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(200);
const QUERY_BACKOFF_CAP: Duration = Duration::from_secs(5);
const PROBE_BACKOFF_CAP: Duration = Duration::from_secs(10);

const CREATE_SESSIONS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS sessions (
    code VARCHAR(6) NOT NULL PRIMARY KEY,
    save_state MEDIUMBLOB,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
)";

const UPSERT_SESSION: &str = "\
INSERT INTO sessions (code, save_state) VALUES (?, ?)
ON DUPLICATE KEY UPDATE save_state = VALUES(save_state), updated_at = CURRENT_TIMESTAMP";

const SELECT_SESSION: &str = "SELECT save_state FROM sessions WHERE code = ?";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("could not recreate connection pool after {attempts} probes")]
    PoolRecreate { attempts: u32 },
}

/// Client for the external session store.
pub struct SessionStore {
    options: MySqlConnectOptions,
    pool_size: u32,
    pool: RwLock<MySqlPool>,
    /// Serializes pool recreation; the generation counter lets callers that
    /// queued behind an in-flight recreation skip their own.
    recreating: Mutex<()>,
    generation: AtomicU64,
}

impl SessionStore {
    /// Build the client without touching the network; connections are
    /// established on first use.
    pub fn connect_lazy(config: &Config) -> Self {
        let options = MySqlConnectOptions::new()
            .host(config.db_host.as_deref().unwrap_or("localhost"))
            .port(config.db_port)
            .username(&config.db_user)
            .password(&config.db_password)
            .database(&config.db_name);
        let pool = build_pool(&options, config.db_pool_size);
        Self {
            options,
            pool_size: config.db_pool_size,
            pool: RwLock::new(pool),
            recreating: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create the `sessions` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.run(|pool| async move {
            sqlx::query(CREATE_SESSIONS_TABLE).execute(&pool).await?;
            Ok(())
        })
        .await
    }

    /// Write-or-update one session row.
    pub async fn upsert(&self, code: &str, blob: &[u8]) -> Result<(), StoreError> {
        let code = code.to_string();
        let blob = blob.to_vec();
        self.run(|pool| {
            let code = code.clone();
            let blob = blob.clone();
            async move {
                sqlx::query(UPSERT_SESSION)
                    .bind(&code)
                    .bind(&blob)
                    .execute(&pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    /// Upsert several rows in one transaction.
    pub async fn upsert_batch(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries = entries.to_vec();
        self.run(|pool| {
            let entries = entries.clone();
            async move {
                let mut tx = pool.begin().await?;
                for (code, blob) in &entries {
                    sqlx::query(UPSERT_SESSION)
                        .bind(code)
                        .bind(blob)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(())
            }
        })
        .await
    }

    /// Read one session's blob; `None` when the code is unknown.
    pub async fn load(&self, code: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let code = code.to_string();
        self.run(|pool| {
            let code = code.clone();
            async move {
                let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as(SELECT_SESSION)
                    .bind(&code)
                    .fetch_optional(&pool)
                    .await?;
                Ok(row.and_then(|(blob,)| blob))
            }
        })
        .await
    }

    /// Run a query with up to [`QUERY_ATTEMPTS`] attempts, healing the pool
    /// between transient failures. Non-transient errors propagate unchanged.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(MySqlPool) -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 1u32;
        loop {
            let (pool, generation) = {
                let guard = self.pool.read().await;
                (guard.clone(), self.generation.load(Ordering::Acquire))
            };
            match op(pool).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < QUERY_ATTEMPTS && is_transient(&err) => {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "transient store failure, healing connection pool"
                    );
                    if let Err(heal_err) = self.heal(generation).await {
                        tracing::warn!(error = %heal_err, "pool recreation failed");
                    }
                    tokio::time::sleep(backoff(attempt, QUERY_BACKOFF_CAP)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Tear down the current pool and probe a fresh one into place.
    ///
    /// Callers pass the pool generation they observed failing; if another
    /// caller already swapped the pool, the recreation is skipped.
    async fn heal(&self, observed_generation: u64) -> Result<(), StoreError> {
        let _guard = self.recreating.lock().await;
        if self.generation.load(Ordering::Acquire) != observed_generation {
            return Ok(());
        }
        let old = self.pool.read().await.clone();
        old.close().await;
        for probe in 1..=POOL_PROBE_ATTEMPTS {
            let fresh = build_pool(&self.options, self.pool_size);
            match fresh.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    *self.pool.write().await = fresh;
                    self.generation.fetch_add(1, Ordering::Release);
                    tracing::info!("store connection pool recreated");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(probe, error = %err, "pool probe failed");
                    fresh.close().await;
                    if probe < POOL_PROBE_ATTEMPTS {
                        tokio::time::sleep(backoff(probe, PROBE_BACKOFF_CAP)).await;
                    }
                }
            }
        }
        Err(StoreError::PoolRecreate {
            attempts: POOL_PROBE_ATTEMPTS,
        })
    }
}

fn build_pool(options: &MySqlConnectOptions, size: u32) -> MySqlPool {
    MySqlPoolOptions::new()
        .max_connections(size)
        .connect_lazy_with(options.clone())
}

/// `min(200ms * 2^(attempt-1), cap)`.
fn backoff(attempt: u32, cap: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    (BACKOFF_BASE * factor).min(cap)
}

/// Whether an error is worth a pool recreation and retry: connection-level
/// I/O failures, pool exhaustion, protocol breakage, and the MySQL server
/// errors for connection loss and connection-count pressure.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionRefused
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::TimedOut
                | ErrorKind::UnexpectedEof
        ),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Protocol(_) => true,
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|mysql| matches!(mysql.number(), 1040 | 1053 | 2002 | 2006 | 2013))
            .unwrap_or(false),
        _ => false,
    }
}
