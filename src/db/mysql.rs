//! MySQL adapter.
//!
//! Binds `?` natively through sqlx. Stored procedures run as `CALL` with
//! output parameters held in session variables, read back with a `SELECT` on
//! the same connection.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::{Either, Executor, MySql, MySqlPool};
use tracing::{debug, info};

use crate::db::adapter::{DatabaseAdapter, PoolState};
use crate::db::params::bind_sqlx_param;
use crate::db::translate::TranslatedQuery;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    Backend, ConnectionSettings, ProcedureCall, RawOutcome, Record, RecordsetCollector,
};

/// Prefix for the session variables that carry procedure outputs.
const OUTPUT_VAR_PREFIX: &str = "@crm_out_";

#[derive(Debug, Clone)]
pub struct MySqlAdapter {
    pool: MySqlPool,
}

impl MySqlAdapter {
    /// Build the pool. sqlx opens `min_connections` eagerly; the first
    /// round trip is left to the caller's `ping`.
    pub async fn connect(settings: &ConnectionSettings) -> DbResult<Self> {
        let opts = &settings.pool;
        let pool = MySqlPoolOptions::new()
            .min_connections(opts.min_connections_or_default())
            .max_connections(opts.max_connections_or_default(false))
            .acquire_timeout(opts.acquire_timeout_or_default())
            .idle_timeout(Some(opts.idle_timeout_or_default()))
            .after_connect(|_conn, meta| {
                Box::pin(async move {
                    debug!(age_ms = meta.age.as_millis() as u64, "MySQL connection opened");
                    Ok(())
                })
            })
            .connect_with(connect_options(settings))
            .await
            .map_err(|e| {
                let suggestion = connection_suggestion(&e);
                DbError::connection(format!("Failed to connect: {}", e), suggestion)
            })?;

        info!(url = %settings.display_url(), "MySQL pool created");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn connect_options(settings: &ConnectionSettings) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .database(&settings.database)
        .charset("utf8mb4");
    if !settings.password.is_empty() {
        options = options.password(&settings.password);
    }

    let ssl_mode = if !settings.encrypt {
        MySqlSslMode::Disabled
    } else if settings.trust_server_certificate {
        MySqlSslMode::Required
    } else if settings.ca_cert.is_some() {
        MySqlSslMode::VerifyCa
    } else {
        MySqlSslMode::VerifyIdentity
    };
    options = options.ssl_mode(ssl_mode);

    if let Some(ca) = &settings.ca_cert {
        options = if settings.ca_cert_is_inline() {
            options.ssl_ca_from_pem(ca.as_bytes().to_vec())
        } else {
            options.ssl_ca(ca)
        };
    }
    options
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the MySQL server is running and accessible".to_string();
    }
    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify DB_*_USER and DB_*_PASSWORD".to_string();
    }
    if error_str.contains("unknown database") {
        return "Check that DB_*_NAME exists on the server".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check DB_ENCRYPT and DB_CLOUD_CA_CERT, or build with a TLS feature".to_string();
    }
    "Verify host, port and credentials for the active target".to_string()
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn backend(&self) -> Backend {
        Backend::Mysql
    }

    async fn fetch_rows(&self, query: &TranslatedQuery) -> DbResult<Vec<Record>> {
        // When params is empty, use raw SQL to avoid prepared statement issues
        let rows = if query.params.is_empty() {
            self.pool.fetch_all(query.sql.as_str()).await?
        } else {
            let mut q = sqlx::query::<MySql>(&query.sql);
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
            let mut q = sqlx::query::<MySql>(&query.sql);
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
        // Some statements (CREATE PROCEDURE) can't be prepared
        let result = if query.params.is_empty() {
            self.pool.execute(query.sql.as_str()).await?
        } else {
            let mut q = sqlx::query::<MySql>(&query.sql);
            for value in query.values() {
                q = bind_sqlx_param(q, value);
            }
            q.execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    async fn call_procedure(&self, call: &ProcedureCall) -> DbResult<RawOutcome> {
        let (call_sql, select_sql) = procedure_sql(call);
        let inputs = call.input_values();

        // Outputs live in session variables, so both statements must share
        // one connection.
        let mut conn = self.pool.acquire().await?;

        let mut q = sqlx::query::<MySql>(&call_sql);
        for value in &inputs {
            q = bind_sqlx_param(q, value);
        }

        // Each procedure result set ends with its own status packet and the
        // CALL adds one more, so every boundary but the last closes a set
        let mut sets = RecordsetCollector::keeping_empty();
        {
            let mut stream = conn.fetch_many(q);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(result) => sets.end_statement(result.rows_affected()),
                    Either::Right(row) => sets.push_row(row.to_record()),
                }
            }
        }
        let mut outcome = sets.finish();
        outcome.recordsets.pop();

        if let Some(select_sql) = select_sql {
            let row = conn.fetch_optional(select_sql.as_str()).await?;
            if let Some(row) = row {
                outcome.output = row.to_record();
            }
        }

        Ok(outcome)
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

/// `CALL name(?, ?, @crm_out_x)` plus the `SELECT` that reads the outputs back.
fn procedure_sql(call: &ProcedureCall) -> (String, Option<String>) {
    let args: Vec<String> = call
        .inputs
        .iter()
        .map(|_| "?".to_string())
        .chain(
            call.outputs
                .iter()
                .map(|(name, _)| format!("{}{}", OUTPUT_VAR_PREFIX, name)),
        )
        .collect();
    let call_sql = format!("CALL `{}`({})", call.name, args.join(", "));

    if call.outputs.is_empty() {
        return (call_sql, None);
    }
    let columns: Vec<String> = call
        .outputs
        .iter()
        .map(|(name, _)| format!("{}{} AS `{}`", OUTPUT_VAR_PREFIX, name, name))
        .collect();
    (call_sql, Some(format!("SELECT {}", columns.join(", "))))
}
