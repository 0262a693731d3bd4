//! The client callers hold.
//!
//! [`DbClient`] bundles the pool manager, executor and connection counters.
//! It is cheap to clone and is passed to whatever needs database access;
//! there is no process-wide instance.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::config::{Config, QueryLimits, RetryPolicy};
use crate::db::adapter::{DatabaseAdapter, PoolState};
use crate::db::executor::QueryExecutor;
use crate::db::health::{ConnectionCounters, HealthStatus};
use crate::db::pool::{Connector, DriverConnector, PoolManager};
use crate::error::DbResult;
use crate::models::{
    Backend, ConnectionSettings, ExecuteResult, ProcedureCall, QueryParam, Record, Statement,
};
use crate::store::Dialect;

#[derive(Debug, Clone)]
pub struct DbClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    pool: Arc<PoolManager>,
    counters: Arc<ConnectionCounters>,
    executor: QueryExecutor,
}

impl DbClient {
    /// Lazy client; the pool opens on first use.
    pub fn new(settings: ConnectionSettings, limits: QueryLimits) -> Self {
        Self::with_connector(Arc::new(DriverConnector::new(settings)), limits)
    }

    /// Client over any connector, with the default retry policy.
    pub fn with_connector(connector: Arc<dyn Connector>, limits: QueryLimits) -> Self {
        Self::with_retry(connector, limits, RetryPolicy::default())
    }

    pub fn with_retry(
        connector: Arc<dyn Connector>,
        limits: QueryLimits,
        retry: RetryPolicy,
    ) -> Self {
        let pool = Arc::new(PoolManager::new(connector, retry));
        let counters = Arc::new(ConnectionCounters::new(limits.leak_warning_threshold));
        let executor = QueryExecutor::new(Arc::clone(&pool), Arc::clone(&counters), limits);
        Self {
            inner: Arc::new(ClientInner {
                pool,
                counters,
                executor,
            }),
        }
    }

    /// Resolve settings, limits and retry policy from configuration.
    pub fn from_config(config: &Config) -> DbResult<Self> {
        let settings = config.connection_settings()?;
        info!(
            backend = %settings.backend,
            target = %settings.target,
            url = %settings.display_url(),
            "Database client configured"
        );
        Ok(Self::with_retry(
            Arc::new(DriverConnector::new(settings)),
            config.query_limits(),
            config.retry_policy(),
        ))
    }

    /// Create the pool now, retrying per the policy.
    pub async fn open(&self) -> DbResult<()> {
        self.inner.pool.get_pool().await.map(|_| ())
    }

    /// Read query; every row decoded into `T`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: Vec<QueryParam>,
    ) -> DbResult<Vec<T>> {
        self.query_statement(&Statement::new(sql).with_params(params))
            .await
    }

    pub async fn query_statement<T: DeserializeOwned>(
        &self,
        statement: &Statement,
    ) -> DbResult<Vec<T>> {
        self.inner.executor.query(statement).await
    }

    /// Read query returning raw records.
    pub async fn fetch_records(&self, statement: &Statement) -> DbResult<Vec<Record>> {
        self.inner.executor.fetch_records(statement).await
    }

    /// Any statement; rows and affected count.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: Vec<QueryParam>,
    ) -> DbResult<ExecuteResult<T>> {
        self.execute_statement(&Statement::new(sql).with_params(params))
            .await
    }

    pub async fn execute_statement<T: DeserializeOwned>(
        &self,
        statement: &Statement,
    ) -> DbResult<ExecuteResult<T>> {
        self.inner.executor.execute(statement).await
    }

    /// Affected-row count only.
    pub async fn execute_non_query(&self, sql: &str, params: Vec<QueryParam>) -> DbResult<u64> {
        self.execute_non_query_statement(&Statement::new(sql).with_params(params))
            .await
    }

    pub async fn execute_non_query_statement(&self, statement: &Statement) -> DbResult<u64> {
        self.inner.executor.execute_non_query(statement).await
    }

    pub async fn call_procedure<T: DeserializeOwned>(
        &self,
        call: &ProcedureCall,
    ) -> DbResult<ExecuteResult<T>> {
        self.inner.executor.call_procedure(call).await
    }

    /// Run `SELECT 1`. Failures are reported in the status, never returned.
    pub async fn check_health(&self) -> HealthStatus {
        let result = self
            .inner
            .executor
            .fetch_records(&Statement::new("SELECT 1"))
            .await;
        let counters = &self.inner.counters;
        let error = match result {
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                Some(e.to_string())
            }
        };
        HealthStatus {
            healthy: error.is_none(),
            active_connections: counters.active(),
            total_connections: counters.total(),
            error,
        }
    }

    /// Close the pool. Idempotent; later operations fail with a connection error.
    pub async fn shutdown(&self, signal: Option<&str>) {
        self.inner.pool.shutdown(signal).await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.pool.is_shut_down()
    }

    pub fn counters(&self) -> &ConnectionCounters {
        &self.inner.counters
    }

    pub fn backend(&self) -> Backend {
        self.inner.pool.backend()
    }

    /// SQL fragments for this client's backend.
    pub fn dialect(&self) -> Dialect {
        Dialect::for_backend(self.backend())
    }

    pub fn limits(&self) -> &QueryLimits {
        self.inner.executor.limits()
    }

    /// Physical pool state; zeroes when no pool is open.
    pub async fn pool_state(&self) -> PoolState {
        match self.inner.pool.current().await {
            Some(adapter) => adapter.pool_state(),
            None => PoolState::default(),
        }
    }

    /// True when both handles share one pool.
    pub fn same_pool(&self, other: &DbClient) -> bool {
        Arc::ptr_eq(&self.inner.pool, &other.inner.pool)
    }

    /// The shared adapter, created on demand.
    pub async fn adapter(&self) -> DbResult<Arc<dyn DatabaseAdapter>> {
        self.inner.pool.get_pool().await
    }
}
