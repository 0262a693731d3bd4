//! CRM data-access core.
//!
//! Contacts, call/chat history and legacy invoices over MySQL, SQL Server or
//! an embedded SQLite file, behind one query interface with pooling,
//! retry-on-connect and `?` placeholder translation.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use config::Config;
pub use db::{DbClient, HealthStatus};
pub use error::{DbError, DbResult};
pub use models::{ExecuteResult, ProcedureCall, QueryParam, Statement};
