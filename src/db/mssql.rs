//! SQL Server adapter.
//!
//! tiberius speaks TDS over a tokio `TcpStream` (through the futures compat
//! layer); bb8 pools the clients. Parameters arrive already rewritten to
//! `@P1..@Pn`, which is how tiberius declares ordinal RPC parameters.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bb8::{ErrorSink, ManageConnection, Pool, PooledConnection, RunError};
use tiberius::{AuthMethod, Client, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, error, info, warn};

use crate::db::adapter::{DatabaseAdapter, PoolState};
use crate::db::params::bind_mssql_param;
use crate::db::translate::TranslatedQuery;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionSettings, ProcedureCall, RawOutcome, Record};

type TdsClient = Client<Compat<TcpStream>>;
type TdsError = tiberius::error::Error;

/// Column carrying the procedure return value in the trailing `SELECT`.
const RETURN_VALUE_COLUMN: &str = "__return_value";
const ROWS_AFFECTED_COLUMN: &str = "__rows_affected";

// =============================================================================
// Connection manager
// =============================================================================

/// Opens TDS clients for bb8.
#[derive(Debug, Clone)]
pub struct TdsConnectionManager {
    config: tiberius::Config,
}

impl TdsConnectionManager {
    pub fn new(settings: &ConnectionSettings) -> DbResult<Self> {
        let mut config = tiberius::Config::new();
        config.host(&settings.host);
        config.port(settings.port);
        config.database(&settings.database);
        config.authentication(AuthMethod::sql_server(&settings.user, &settings.password));
        config.application_name("crm-db");

        if settings.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::Off);
        }

        if settings.trust_server_certificate {
            config.trust_cert();
        } else if let Some(ca) = &settings.ca_cert {
            if settings.ca_cert_is_inline() {
                return Err(DbError::configuration(
                    "SQL Server needs DB_CLOUD_CA_CERT as a path to a PEM file",
                ));
            }
            config.trust_cert_ca(ca);
        }

        Ok(Self { config })
    }

    async fn open(config: &tiberius::Config) -> Result<TdsClient, TdsError> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(config.clone(), tcp.compat_write()).await
    }
}

#[async_trait]
impl ManageConnection for TdsConnectionManager {
    type Connection = TdsClient;
    type Error = TdsError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        match Self::open(&self.config).await {
            // Azure SQL gateways redirect to the node that owns the database
            Err(TdsError::Routing { host, port }) => {
                debug!(host = %host, port, "SQL Server redirected connection");
                let mut config = self.config.clone();
                config.host(&host);
                config.port(port);
                Self::open(&config).await
            }
            other => other,
        }
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Logs asynchronous pool errors (failed background connects) instead of
/// dropping them silently.
#[derive(Debug, Clone, Copy)]
struct LogErrorSink;

impl ErrorSink<TdsError> for LogErrorSink {
    fn sink(&self, err: TdsError) {
        error!(error = %err, "SQL Server pool error");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<TdsError>> {
        Box::new(*self)
    }
}

fn map_run_error(err: RunError<TdsError>) -> DbError {
    match err {
        RunError::User(e) => {
            let mapped = DbError::from(e);
            match mapped {
                DbError::Connection { .. } => mapped,
                other => DbError::connection(
                    format!("Failed to open a connection: {}", other),
                    "Verify host, port and credentials for the active target",
                ),
            }
        }
        RunError::TimedOut => DbError::connection(
            "Timed out acquiring a connection from the pool",
            "Increase DB_POOL_ACQUIRE_TIMEOUT_SECS or DB_POOL_MAX, or look for leaked connections",
        ),
    }
}

// =============================================================================
// Adapter
// =============================================================================

pub struct MssqlAdapter {
    pool: Mutex<Option<Pool<TdsConnectionManager>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MssqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlAdapter")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MssqlAdapter {
    pub async fn connect(settings: &ConnectionSettings) -> DbResult<Self> {
        let manager = TdsConnectionManager::new(settings)?;
        let opts = &settings.pool;
        let min_idle = opts.min_connections_or_default();

        let pool = Pool::builder()
            .max_size(opts.max_connections_or_default(false))
            .min_idle(if min_idle > 0 { Some(min_idle) } else { None })
            .idle_timeout(Some(opts.idle_timeout_or_default()))
            .connection_timeout(opts.acquire_timeout_or_default())
            .error_sink(Box::new(LogErrorSink))
            .build(manager)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to connect: {}", e),
                    "Check that SQL Server is reachable and the login is enabled",
                )
            })?;

        info!(url = %settings.display_url(), "SQL Server pool created");
        Ok(Self {
            pool: Mutex::new(Some(pool)),
            closed: AtomicBool::new(false),
        })
    }

    fn pool(&self) -> DbResult<Pool<TdsConnectionManager>> {
        let slot = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone()
            .ok_or_else(|| DbError::connection("Connection pool is closed", "Reopen the database client"))
    }

    async fn conn(
        pool: &Pool<TdsConnectionManager>,
    ) -> DbResult<PooledConnection<'_, TdsConnectionManager>> {
        pool.get().await.map_err(map_run_error)
    }
}

fn build_query(query: &TranslatedQuery) -> Query<'_> {
    let mut q = Query::new(query.sql.as_str());
    for value in query.values() {
        bind_mssql_param(&mut q, value);
    }
    q
}

/// Append a trailing `SELECT @@ROWCOUNT` so row-returning statements still
/// report a count.
fn with_rowcount(sql: &str) -> String {
    let trimmed = sql.trim_end().trim_end_matches(';');
    format!(
        "{}\n; SELECT CAST(@@ROWCOUNT AS BIGINT) AS rows_affected",
        trimmed
    )
}

/// `[dbo].[name]` from `dbo.name`.
fn quote_name(name: &str) -> String {
    name.split('.')
        .map(|part| format!("[{}]", part))
        .collect::<Vec<_>>()
        .join(".")
}

/// One batch that declares the outputs, runs the procedure and selects the
/// return value plus every output parameter.
fn procedure_batch(call: &ProcedureCall) -> String {
    let mut sql = String::from("DECLARE @__rv INT;\n");
    for (name, ty) in &call.outputs {
        sql.push_str(&format!("DECLARE @__out_{} {};\n", name, ty.mssql_type()));
    }

    let args: Vec<String> = call
        .inputs
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("@{} = @P{}", name, i + 1))
        .chain(
            call.outputs
                .iter()
                .map(|(name, _)| format!("@{} = @__out_{} OUTPUT", name, name)),
        )
        .collect();

    sql.push_str(&format!("EXEC @__rv = {}", quote_name(&call.name)));
    if !args.is_empty() {
        sql.push(' ');
        sql.push_str(&args.join(", "));
    }
    sql.push_str(";\n");

    // @@ROWCOUNT here still refers to the EXEC
    let columns: Vec<String> = [
        format!("@__rv AS [{}]", RETURN_VALUE_COLUMN),
        format!("CAST(@@ROWCOUNT AS BIGINT) AS [{}]", ROWS_AFFECTED_COLUMN),
    ]
    .into_iter()
    .chain(
            call.outputs
                .iter()
                .map(|(name, _)| format!("@__out_{} AS [{}]", name, name)),
        )
        .collect();
    sql.push_str(&format!("SELECT {};", columns.join(", ")));
    sql
}

/// Split the trailing output row into named outputs, the return value and
/// the row count.
fn split_output(mut row: Record) -> RawOutcome {
    let return_value = row.remove(RETURN_VALUE_COLUMN).and_then(|v| v.as_i64());
    let rows_affected = row
        .remove(ROWS_AFFECTED_COLUMN)
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    RawOutcome {
        rows_affected: rows_affected.max(0) as u64,
        output: row,
        return_value,
        ..Default::default()
    }
}

/// Result sets that returned rows, as records.
fn non_empty_sets(results: Vec<Vec<tiberius::Row>>) -> Vec<Vec<Record>> {
    results
        .into_iter()
        .filter(|set| !set.is_empty())
        .map(|set| set.iter().map(RowToJson::to_record).collect())
        .collect()
}

#[async_trait]
impl DatabaseAdapter for MssqlAdapter {
    fn backend(&self) -> Backend {
        Backend::Mssql
    }

    async fn fetch_rows(&self, query: &TranslatedQuery) -> DbResult<Vec<Record>> {
        let pool = self.pool()?;
        let mut conn = Self::conn(&pool).await?;
        let rows = build_query(query)
            .query(&mut *conn)
            .await?
            .into_first_result()
            .await?;
        Ok(rows.iter().map(RowToJson::to_record).collect())
    }

    async fn execute(&self, query: &TranslatedQuery) -> DbResult<RawOutcome> {
        let pool = self.pool()?;
        let mut conn = Self::conn(&pool).await?;

        let sql = with_rowcount(&query.sql);
        let mut q = Query::new(sql.as_str());
        for value in query.values() {
            bind_mssql_param(&mut q, value);
        }
        let mut results = q.query(&mut *conn).await?.into_results().await?;

        let rows_affected = results
            .pop()
            .and_then(|set| set.into_iter().next())
            .and_then(|row| row.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0);

        Ok(RawOutcome {
            recordsets: non_empty_sets(results),
            rows_affected: rows_affected.max(0) as u64,
            ..Default::default()
        })
    }

    async fn execute_non_query(&self, query: &TranslatedQuery) -> DbResult<u64> {
        let pool = self.pool()?;
        let mut conn = Self::conn(&pool).await?;
        let result = build_query(query).execute(&mut *conn).await?;
        Ok(result.rows_affected().first().copied().unwrap_or(0))
    }

    async fn call_procedure(&self, call: &ProcedureCall) -> DbResult<RawOutcome> {
        let pool = self.pool()?;
        let mut conn = Self::conn(&pool).await?;

        let sql = procedure_batch(call);
        let inputs = call.input_values();
        let mut q = Query::new(sql.as_str());
        for value in &inputs {
            bind_mssql_param(&mut q, value);
        }

        let mut results = q.query(&mut *conn).await?.into_results().await?;
        let outcome = results
            .pop()
            .and_then(|set| set.into_iter().next())
            .map(|row| split_output(row.to_record()))
            .unwrap_or_default();

        Ok(RawOutcome {
            recordsets: results
                .iter()
                .map(|set| set.iter().map(RowToJson::to_record).collect())
                .collect(),
            ..outcome
        })
    }

    async fn ping(&self) -> DbResult<()> {
        let pool = self.pool()?;
        let mut conn = Self::conn(&pool).await?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match pool {
            // Connections close once the last checked-out one is returned
            Some(pool) => {
                let state = pool.state();
                if state.connections > state.idle_connections {
                    warn!(
                        in_use = state.connections - state.idle_connections,
                        "Closing SQL Server pool with connections still checked out"
                    );
                }
                drop(pool);
                debug!("SQL Server pool closed");
            }
            None => debug!("SQL Server pool already released"),
        }
    }

    fn pool_state(&self) -> PoolState {
        match self.pool() {
            Ok(pool) => {
                let state = pool.state();
                PoolState {
                    size: state.connections,
                    idle: state.idle_connections,
                }
            }
            Err(_) => PoolState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputType;

    #[test]
    fn test_with_rowcount_strips_trailing_semicolon() {
        assert_eq!(
            with_rowcount("UPDATE contacts SET email = @P1 WHERE contactid = @P2;  "),
            "UPDATE contacts SET email = @P1 WHERE contactid = @P2\n; SELECT CAST(@@ROWCOUNT AS BIGINT) AS rows_affected"
        );
    }

    #[test]
    fn test_with_rowcount_survives_trailing_line_comment() {
        let sql = with_rowcount("DELETE FROM calls -- cleanup");
        assert!(sql.contains("-- cleanup\n; SELECT"));
    }

    #[test]
    fn test_quote_name_with_schema() {
        assert_eq!(quote_name("dbo.add_contact"), "[dbo].[add_contact]");
        assert_eq!(quote_name("add_contact"), "[add_contact]");
    }

    #[test]
    fn test_procedure_batch() {
        let call = ProcedureCall::new("dbo.add_contact")
            .input("firstname", "Ada")
            .input("email", "ada@example.com")
            .output("new_id", OutputType::Int);
        let sql = procedure_batch(&call);

        assert!(sql.starts_with("DECLARE @__rv INT;\nDECLARE @__out_new_id INT;\n"));
        assert!(sql.contains(
            "EXEC @__rv = [dbo].[add_contact] @firstname = @P1, @email = @P2, @new_id = @__out_new_id OUTPUT;"
        ));
        assert!(sql.ends_with(
            "SELECT @__rv AS [__return_value], CAST(@@ROWCOUNT AS BIGINT) AS [__rows_affected], @__out_new_id AS [new_id];"
        ));
    }

    #[test]
    fn test_procedure_batch_without_args() {
        let sql = procedure_batch(&ProcedureCall::new("refresh_stats"));
        assert!(sql.contains("EXEC @__rv = [refresh_stats];"));
        assert!(sql.ends_with(
            "SELECT @__rv AS [__return_value], CAST(@@ROWCOUNT AS BIGINT) AS [__rows_affected];"
        ));
    }

    #[test]
    fn test_split_output() {
        let mut row = Record::new();
        row.insert(RETURN_VALUE_COLUMN.into(), serde_json::json!(0));
        row.insert(ROWS_AFFECTED_COLUMN.into(), serde_json::json!(3));
        row.insert("new_id".into(), serde_json::json!(42));
        let outcome = split_output(row);
        assert_eq!(outcome.return_value, Some(0));
        assert_eq!(outcome.rows_affected, 3);
        assert_eq!(outcome.output.get("new_id"), Some(&serde_json::json!(42)));
        assert!(!outcome.output.contains_key(RETURN_VALUE_COLUMN));
        assert!(!outcome.output.contains_key(ROWS_AFFECTED_COLUMN));
        assert!(outcome.recordsets.is_empty());
    }

    #[test]
    fn test_inline_ca_is_rejected() {
        let mut settings = ConnectionSettings::sqlite("unused");
        settings.backend = Backend::Mssql;
        settings.host = "db".into();
        settings.port = 1433;
        settings.ca_cert = Some("-----BEGIN CERTIFICATE-----\nMIIB".into());
        let err = TdsConnectionManager::new(&settings).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }
}
