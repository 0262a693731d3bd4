//! Database access layer.
//!
//! - [`translate`]: `?` placeholder rewriting for each backend
//! - [`adapter`] plus one module per driver ([`mysql`], [`mssql`], [`sqlite`])
//! - [`pool`]: lazy, retried, single-flight pool creation and shutdown
//! - [`executor`]: limits, timeouts and logging around every call
//! - [`health`]: counters, health status and the diagnostics reporter
//! - [`client`]: the [`DbClient`] facade callers hold

pub mod adapter;
pub mod client;
pub mod executor;
pub mod health;
pub mod mssql;
pub mod mysql;
pub mod params;
pub mod pool;
pub mod sqlite;
pub mod translate;
pub mod types;

pub use adapter::{DatabaseAdapter, PoolState};
pub use client::DbClient;
pub use executor::QueryExecutor;
pub use health::{ConnectionCounters, ConnectionGuard, DiagnosticsReporter, HealthStatus};
pub use mssql::MssqlAdapter;
pub use mysql::MySqlAdapter;
pub use pool::{Connector, DriverConnector, PoolManager};
pub use sqlite::SqliteAdapter;
pub use translate::{PlaceholderStyle, SqlSyntax, TranslatedQuery, TranslationMode, translate};
