//! Data models for the CRM data-access core.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{Backend, ConnectionSettings, Target};
pub use query::{
    ExecuteResult, OutputType, ProcedureCall, QueryParam, RawOutcome, Record,
    RecordsetCollector, Statement, decode_records,
};
