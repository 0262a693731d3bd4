//! SQLite adapter.
//!
//! Embedded file database used for local development and the crate's own
//! integration tests. Binds `?` natively and has no stored procedures.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Either, Executor, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::db::adapter::{DatabaseAdapter, PoolState};
use crate::db::params::bind_sqlx_param;
use crate::db::translate::TranslatedQuery;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    Backend, ConnectionSettings, ProcedureCall, RawOutcome, Record, RecordsetCollector,
};

#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: SqlitePool,
}

impl SqliteAdapter {
    /// Open (creating if missing) the configured database file.
    pub async fn connect(settings: &ConnectionSettings) -> DbResult<Self> {
        let opts = &settings.pool;
        let options = SqliteConnectOptions::new()
            .filename(&settings.sqlite_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(opts.min_connections_or_default())
            .max_connections(opts.max_connections_or_default(true))
            .acquire_timeout(opts.acquire_timeout_or_default())
            .idle_timeout(Some(opts.idle_timeout_or_default()))
            .after_connect(|_conn, meta| {
                Box::pin(async move {
                    debug!(age_ms = meta.age.as_millis() as u64, "SQLite connection opened");
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to open SQLite database: {}", e),
                    "Verify DB_SQLITE_PATH points to a writable location",
                )
            })?;

        info!(path = %settings.sqlite_path.display(), "SQLite pool created");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn fetch_rows(&self, query: &TranslatedQuery) -> DbResult<Vec<Record>> {
        // Without params, run as raw SQL so multi-statement scripts work
        let rows = if query.params.is_empty() {
            self.pool.fetch_all(query.sql.as_str()).await?
        } else {
            let mut q = sqlx::query::<Sqlite>(&query.sql);
            for value in query.values() {
                q = bind_sqlx_param(q, value);
            }
            q.fetch_all(&self.pool).await?
        };
        Ok(rows.iter().map(RowToJson::to_record).collect())
    }

    async fn execute(&self, query: &TranslatedQuery) -> DbResult<RawOutcome> {
        // Unprepared text so multi-statement batches are accepted
        let mut stream = if query.params.is_empty() {
            self.pool.fetch_many(query.sql.as_str())
        } else {
            let mut q = sqlx::query::<Sqlite>(&query.sql);
            for value in query.values() {
                q = bind_sqlx_param(q, value);
            }
            self.pool.fetch_many(q)
        };

        let mut sets = RecordsetCollector::default();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(result) => sets.end_statement(result.rows_affected()),
                Either::Right(row) => sets.push_row(row.to_record()),
            }
        }
        Ok(sets.finish())
    }

    async fn execute_non_query(&self, query: &TranslatedQuery) -> DbResult<u64> {
        let result = if query.params.is_empty() {
            self.pool.execute(query.sql.as_str()).await?
        } else {
            let mut q = sqlx::query::<Sqlite>(&query.sql);
            for value in query.values() {
                q = bind_sqlx_param(q, value);
            }
            q.execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    async fn call_procedure(&self, call: &ProcedureCall) -> DbResult<RawOutcome> {
        Err(DbError::validation(format!(
            "SQLite has no stored procedures (cannot call '{}')",
            call.name
        )))
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn pool_state(&self) -> PoolState {
        PoolState {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }
}
