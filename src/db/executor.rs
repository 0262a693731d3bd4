//! Query execution engine.
//!
//! Every operation goes through the same path:
//!
//! 1. Safety guards (text length, parameter count, procedure identifiers),
//!    checked before the pool is touched
//! 2. Placeholder translation for the pool's backend
//! 3. Pool acquisition (with its own connect retries), then the adapter call
//!    under the per-call timeout
//! 4. Timing, slow-query warning and error logging with bounded previews

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::QueryLimits;
use crate::db::adapter::DatabaseAdapter;
use crate::db::health::ConnectionCounters;
use crate::db::pool::PoolManager;
use crate::db::translate::{
    PlaceholderStyle, SqlSyntax, TranslatedQuery, TranslationMode, translate,
};
use crate::error::{DbError, DbResult};
use crate::models::{
    ExecuteResult, ProcedureCall, QueryParam, Record, Statement, decode_records,
};

/// Longest query preview written to logs, in characters.
const QUERY_PREVIEW_CHARS: usize = 200;
/// Longest single parameter preview, in characters.
const PARAM_PREVIEW_CHARS: usize = 32;
/// Parameters shown in an error preview.
const PARAM_PREVIEW_COUNT: usize = 10;

#[derive(Debug)]
pub struct QueryExecutor {
    pool: Arc<PoolManager>,
    counters: Arc<ConnectionCounters>,
    limits: QueryLimits,
    mode: TranslationMode,
}

impl QueryExecutor {
    pub fn new(pool: Arc<PoolManager>, counters: Arc<ConnectionCounters>, limits: QueryLimits) -> Self {
        Self {
            pool,
            counters,
            limits,
            mode: TranslationMode::default(),
        }
    }

    /// Switch placeholder scanning mode.
    pub fn with_translation_mode(mut self, mode: TranslationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Run a read query and decode every row into `T`.
    pub async fn query<T: DeserializeOwned>(&self, statement: &Statement) -> DbResult<Vec<T>> {
        let rows = self.fetch_records(statement).await?;
        decode_records(rows)
    }

    /// Run a read query and return raw records.
    pub async fn fetch_records(&self, statement: &Statement) -> DbResult<Vec<Record>> {
        self.run_statement("query", statement, |adapter, q| async move {
            adapter.fetch_rows(&q).await
        })
        .await
    }

    /// Run any statement and return rows plus affected count.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        statement: &Statement,
    ) -> DbResult<ExecuteResult<T>> {
        let raw = self
            .run_statement("execute", statement, |adapter, q| async move {
                adapter.execute(&q).await
            })
            .await?;
        ExecuteResult::decode(raw)
    }

    /// Run a statement and return the affected-row count.
    pub async fn execute_non_query(&self, statement: &Statement) -> DbResult<u64> {
        self.run_statement("execute_non_query", statement, |adapter, q| async move {
            adapter.execute_non_query(&q).await
        })
        .await
    }

    /// Invoke a stored procedure.
    pub async fn call_procedure<T: DeserializeOwned>(
        &self,
        call: &ProcedureCall,
    ) -> DbResult<ExecuteResult<T>> {
        validate_procedure(call, self.limits.max_params)?;

        let limit = call.timeout.unwrap_or(self.limits.default_timeout);
        let (start, result) = self
            .run_timed(limit, |adapter| async move { adapter.call_procedure(call).await })
            .await;

        let raw = self.finish(
            "call_procedure",
            &call.name,
            &call.input_values(),
            limit,
            start,
            result,
        )?;
        ExecuteResult::decode(raw)
    }

    async fn run_statement<R, F, Fut>(
        &self,
        operation: &'static str,
        statement: &Statement,
        run: F,
    ) -> DbResult<R>
    where
        F: FnOnce(Arc<dyn DatabaseAdapter>, TranslatedQuery) -> Fut,
        Fut: Future<Output = DbResult<R>>,
    {
        self.validate_request(&statement.sql, statement.params.len())?;
        let backend = self.pool.backend();
        let translated = translate(
            &statement.sql,
            &statement.params,
            &PlaceholderStyle::for_backend(backend),
            SqlSyntax::for_backend(backend),
            self.mode,
        )?;

        let limit = statement.timeout.unwrap_or(self.limits.default_timeout);
        debug!(
            operation,
            params = statement.params.len(),
            timeout_ms = limit.as_millis() as u64,
            "Executing statement"
        );

        let (start, result) = self
            .run_timed(limit, |adapter| run(adapter, translated))
            .await;

        self.finish(
            operation,
            &statement.sql,
            &statement.params,
            limit,
            start,
            result,
        )
    }

    /// Acquire the pool, then run `run` under `limit`. Pool creation and its
    /// retries are not counted against the statement timeout.
    async fn run_timed<R, F, Fut>(
        &self,
        limit: Duration,
        run: F,
    ) -> (Instant, Result<DbResult<R>, Elapsed>)
    where
        F: FnOnce(Arc<dyn DatabaseAdapter>) -> Fut,
        Fut: Future<Output = DbResult<R>>,
    {
        let adapter = match self.pool.get_pool().await {
            Ok(adapter) => adapter,
            Err(e) => return (Instant::now(), Ok(Err(e))),
        };

        let start = Instant::now();
        let _guard = self.counters.acquire();
        let result = timeout(limit, run(adapter)).await;
        (start, result)
    }

    /// Reject oversized requests before any pool access.
    pub fn validate_request(&self, sql: &str, param_count: usize) -> DbResult<()> {
        let length = sql.chars().count();
        if length > self.limits.max_query_length {
            return Err(DbError::validation(format!(
                "Query text is {} characters, limit is {}",
                length, self.limits.max_query_length
            )));
        }
        if param_count > self.limits.max_params {
            return Err(DbError::validation(format!(
                "Query has {} parameters, limit is {}",
                param_count, self.limits.max_params
            )));
        }
        Ok(())
    }

    fn finish<R>(
        &self,
        operation: &'static str,
        sql: &str,
        params: &[QueryParam],
        limit: Duration,
        start: Instant,
        result: Result<DbResult<R>, Elapsed>,
    ) -> DbResult<R> {
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(DbError::timeout(operation, limit.as_millis() as u64)),
        };

        match &result {
            Ok(_) => {
                if is_slow(elapsed, self.limits.slow_query) {
                    warn!(
                        operation,
                        elapsed_ms,
                        query = %preview_query(sql),
                        "Slow query"
                    );
                }
                debug!(operation, elapsed_ms, "Statement completed");
            }
            Err(e) => error!(
                operation,
                elapsed_ms,
                error = %e,
                query = %preview_query(sql),
                param_count = params.len(),
                params = %preview_params(params),
                "Statement failed"
            ),
        }
        result
    }
}

/// Only durations past the threshold count as slow.
fn is_slow(elapsed: Duration, threshold: Duration) -> bool {
    elapsed > threshold
}

fn validate_procedure(call: &ProcedureCall, max_params: usize) -> DbResult<()> {
    if !is_valid_procedure_name(&call.name) {
        return Err(DbError::validation(format!(
            "Invalid procedure name '{}'",
            truncate_chars(&call.name, PARAM_PREVIEW_CHARS)
        )));
    }

    let names = call
        .inputs
        .iter()
        .map(|(name, _)| name)
        .chain(call.outputs.iter().map(|(name, _)| name));
    for name in names {
        if !is_valid_identifier(name) {
            return Err(DbError::validation(format!(
                "Invalid parameter name '{}'",
                truncate_chars(name, PARAM_PREVIEW_CHARS)
            )));
        }
    }

    let count = call.inputs.len() + call.outputs.len();
    if count > max_params {
        return Err(DbError::validation(format!(
            "Procedure call has {} parameters, limit is {}",
            count, max_params
        )));
    }
    Ok(())
}

/// `name` or `schema.name`, each part a plain identifier.
pub fn is_valid_procedure_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_valid_identifier(part))
}

/// ASCII letter or `_` first, then letters, digits or `_`; at most 128 chars.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Cut to at most `max` characters without splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn preview_query(sql: &str) -> String {
    let collapsed: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, QUERY_PREVIEW_CHARS)
}

fn preview_params(params: &[QueryParam]) -> String {
    let mut shown: Vec<String> = params
        .iter()
        .take(PARAM_PREVIEW_COUNT)
        .map(|p| truncate_chars(&p.display_value(), PARAM_PREVIEW_CHARS))
        .collect();
    if params.len() > PARAM_PREVIEW_COUNT {
        shown.push(format!("(+{} more)", params.len() - PARAM_PREVIEW_COUNT));
    }
    format!("[{}]", shown.join(", "))
}
