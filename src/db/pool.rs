//! Connection pool management.
//!
//! [`PoolManager`] owns the one shared adapter for a client. The adapter is
//! created lazily on first use (or eagerly by `DbClient::open`), recreated if
//! it reports itself closed, and closed exactly once by [`PoolManager::shutdown`].
//!
//! # Concurrency
//!
//! - The slot is a `tokio::sync::RwLock`; readers clone the `Arc` and release
//!   the lock before awaiting anything.
//! - Creation is single-flight: a `tokio::sync::Mutex<()>` serializes
//!   creators, and each re-checks the slot after acquiring it, so concurrent
//!   callers wait on one attempt and then share its result.
//! - Shutdown is an `AtomicBool` swap. Only the caller that flips it closes
//!   the adapter; a shut-down manager never creates another.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::db::adapter::DatabaseAdapter;
use crate::db::mssql::MssqlAdapter;
use crate::db::mysql::MySqlAdapter;
use crate::db::sqlite::SqliteAdapter;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionSettings};

/// Builds one adapter per call. Pool creation retries go through this seam.
#[async_trait]
pub trait Connector: Send + Sync {
    fn backend(&self) -> Backend;

    /// Open a pool and verify it can reach the server.
    async fn connect(&self) -> DbResult<Arc<dyn DatabaseAdapter>>;
}

/// Production connector: picks the adapter for the configured backend and
/// checks it with a `SELECT 1` round trip.
#[derive(Debug, Clone)]
pub struct DriverConnector {
    settings: ConnectionSettings,
}

impl DriverConnector {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}

#[async_trait]
impl Connector for DriverConnector {
    fn backend(&self) -> Backend {
        self.settings.backend
    }

    async fn connect(&self) -> DbResult<Arc<dyn DatabaseAdapter>> {
        let adapter: Arc<dyn DatabaseAdapter> = match self.settings.backend {
            Backend::Mysql => Arc::new(MySqlAdapter::connect(&self.settings).await?),
            Backend::Mssql => Arc::new(MssqlAdapter::connect(&self.settings).await?),
            Backend::Sqlite => Arc::new(SqliteAdapter::connect(&self.settings).await?),
        };

        if let Err(e) = adapter.ping().await {
            adapter.close().await;
            return Err(e);
        }
        Ok(adapter)
    }
}

pub struct PoolManager {
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    slot: RwLock<Option<Arc<dyn DatabaseAdapter>>>,
    create_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("backend", &self.connector.backend())
            .field("retry", &self.retry)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl PoolManager {
    pub fn new(connector: Arc<dyn Connector>, retry: RetryPolicy) -> Self {
        Self {
            connector,
            retry,
            slot: RwLock::new(None),
            create_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> Backend {
        self.connector.backend()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The live adapter, if one exists. Never creates.
    pub async fn current(&self) -> Option<Arc<dyn DatabaseAdapter>> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|adapter| !adapter.is_closed())
            .cloned()
    }

    /// Return the shared adapter, creating it if absent or closed.
    pub async fn get_pool(&self) -> DbResult<Arc<dyn DatabaseAdapter>> {
        self.ensure_open()?;
        if let Some(adapter) = self.current().await {
            return Ok(adapter);
        }

        let _creating = self.create_lock.lock().await;
        // Another caller may have finished creating while we waited
        self.ensure_open()?;
        if let Some(adapter) = self.current().await {
            return Ok(adapter);
        }

        let adapter = self
            .create_pool_with_retry(self.retry.attempts, self.retry.delay)
            .await?;
        *self.slot.write().await = Some(Arc::clone(&adapter));

        // Shutdown may have emptied the slot while we were connecting
        if self.is_shut_down() {
            if let Some(orphan) = self.slot.write().await.take() {
                orphan.close().await;
            }
            return Err(closed_error());
        }
        Ok(adapter)
    }

    /// Attempt pool creation up to `retries` times (at least once).
    ///
    /// After failed attempt `n` the next attempt waits `delay * n`. The final
    /// error carries the last underlying message and the attempt count.
    pub async fn create_pool_with_retry(
        &self,
        retries: u32,
        delay: Duration,
    ) -> DbResult<Arc<dyn DatabaseAdapter>> {
        let attempts = retries.max(1);
        let mut last_error: Option<DbError> = None;

        for attempt in 1..=attempts {
            debug!(attempt, attempts, backend = %self.backend(), "Creating connection pool");
            match self.connector.connect().await {
                Ok(adapter) => {
                    info!(attempt, backend = %self.backend(), "Connection pool ready");
                    return Ok(adapter);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Connection pool creation failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay * attempt).await;
                    }
                }
            }
        }

        let (message, suggestion) = match last_error {
            Some(DbError::Connection {
                message,
                suggestion,
            }) => (message, suggestion),
            Some(other) => (
                other.to_string(),
                "Verify the database settings for the active target".to_string(),
            ),
            None => (String::new(), String::new()),
        };
        Err(DbError::connection(
            format!(
                "Could not create connection pool after {} attempt(s): {}",
                attempts, message
            ),
            suggestion,
        ))
    }

    /// Close the pool. Idempotent; only the first call does any work.
    pub async fn shutdown(&self, signal: Option<&str>) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!(signal = ?signal, "Shutdown already performed");
            return;
        }

        match signal {
            Some(signal) => info!(signal, "Shutting down database pool"),
            None => info!("Shutting down database pool"),
        }

        let adapter = self.slot.write().await.take();
        match adapter {
            Some(adapter) => {
                adapter.close().await;
                info!(backend = %adapter.backend(), "Database pool closed");
            }
            None => debug!("No database pool was open"),
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_shut_down() {
            return Err(closed_error());
        }
        Ok(())
    }
}

fn closed_error() -> DbError {
    DbError::connection(
        "Database client has been shut down",
        "Create a new client after shutdown",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::adapter::PoolState;
    use crate::db::translate::TranslatedQuery;
    use crate::models::{ProcedureCall, RawOutcome, Record};
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[derive(Default)]
    struct NullAdapter {
        closed: AtomicBool,
    }

    #[async_trait]
    impl DatabaseAdapter for NullAdapter {
        fn backend(&self) -> Backend {
            Backend::Sqlite
        }
        async fn fetch_rows(&self, _: &TranslatedQuery) -> DbResult<Vec<Record>> {
            Ok(Vec::new())
        }
        async fn execute(&self, _: &TranslatedQuery) -> DbResult<RawOutcome> {
            Ok(RawOutcome::default())
        }
        async fn execute_non_query(&self, _: &TranslatedQuery) -> DbResult<u64> {
            Ok(0)
        }
        async fn call_procedure(&self, _: &ProcedureCall) -> DbResult<RawOutcome> {
            Ok(RawOutcome::default())
        }
        async fn ping(&self) -> DbResult<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn pool_state(&self) -> PoolState {
            PoolState::default()
        }
    }

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyConnector {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        fn backend(&self) -> Backend {
            Backend::Sqlite
        }
        async fn connect(&self) -> DbResult<Arc<dyn DatabaseAdapter>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(DbError::connection(format!("refused #{}", n), "start it"));
            }
            Ok(Arc::new(NullAdapter::default()))
        }
    }

    fn manager(failures: u32, attempts: u32, delay_ms: u64) -> (PoolManager, Arc<FlakyConnector>) {
        let connector = Arc::new(FlakyConnector {
            failures,
            calls: AtomicU32::new(0),
        });
        let manager = PoolManager::new(
            connector.clone(),
            RetryPolicy::new(attempts, Duration::from_millis(delay_ms)),
        );
        (manager, connector)
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let (manager, connector) = manager(u32::MAX, 3, 0);
        let err = match manager.get_pool().await {
            Ok(_) => panic!("expected failure"),
            Err(e) => e,
        };
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
        let msg = err.to_string();
        assert!(msg.contains("refused #3"));
        assert!(msg.contains("3 attempt"));
    }

    #[tokio::test]
    async fn test_retry_recovers_and_waits_increasing_delays() {
        let (manager, connector) = manager(2, 3, 20);
        let start = Instant::now();
        manager.get_pool().await.expect("third attempt should succeed");
        // 20ms after the first failure, 40ms after the second
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let (manager, connector) = manager(u32::MAX, 0, 0);
        assert!(manager.get_pool().await.is_err());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_adapter_is_recreated() {
        let (manager, connector) = manager(0, 1, 0);
        let first = manager.get_pool().await.expect("should connect");
        first.close().await;
        let second = manager.get_pool().await.expect("should reconnect");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_pools() {
        let (manager, connector) = manager(0, 1, 0);
        manager.shutdown(Some("SIGTERM")).await;
        manager.shutdown(None).await;
        assert!(manager.is_shut_down());
        assert!(matches!(
            manager.get_pool().await,
            Err(DbError::Connection { .. })
        ));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }
}
