//! Backend adapter trait.
//!
//! One implementation per driver. An adapter owns its physical pool, binds
//! already-translated parameters for its driver and normalizes rows into
//! [`Record`]s. Everything above it is backend-agnostic.

use async_trait::async_trait;
use serde::Serialize;

use crate::db::translate::TranslatedQuery;
use crate::error::DbResult;
use crate::models::{Backend, ProcedureCall, RawOutcome, Record};

/// Snapshot of the physical pool, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolState {
    /// Open physical connections.
    pub size: u32,
    /// Open connections not currently checked out.
    pub idle: u32,
}

#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn backend(&self) -> Backend;

    /// Run a statement and return the rows of its first result set.
    async fn fetch_rows(&self, query: &TranslatedQuery) -> DbResult<Vec<Record>>;

    /// Run a statement and return rows plus the affected-row count.
    async fn execute(&self, query: &TranslatedQuery) -> DbResult<RawOutcome>;

    /// Run a statement and return the affected-row count only.
    async fn execute_non_query(&self, query: &TranslatedQuery) -> DbResult<u64>;

    /// Invoke a stored procedure. The name has already been validated.
    async fn call_procedure(&self, call: &ProcedureCall) -> DbResult<RawOutcome>;

    /// Round-trip `SELECT 1`.
    async fn ping(&self) -> DbResult<()>;

    fn is_closed(&self) -> bool;

    /// Close the physical pool. Safe to call more than once.
    async fn close(&self);

    fn pool_state(&self) -> PoolState;
}
