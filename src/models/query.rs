//! Query-related data models.
//!
//! This module defines the statement carrier handed to the executor and the
//! result shapes returned to callers.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};

/// One result row: column name to JSON value, in backend column order.
pub type Record = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Render the value for log output, without any length bound.
    pub fn display_value(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for QueryParam {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// ```
/// use crm_db::params;
/// let p = params![42, "a@b.com", None::<i64>];
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::models::QueryParam>::new() };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

/// SQL text with `?` placeholders and the values that fill them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Overrides the client's default per-call timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Statement {
    /// Create a statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    /// Append one parameter.
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Replace the parameter list.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// SQL type of a stored-procedure output parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Int,
    BigInt,
    Float,
    Bool,
    Text,
    DateTime,
}

impl OutputType {
    /// Declaration type used for the output variable on SQL Server.
    pub fn mssql_type(&self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::Bool => "BIT",
            Self::Text => "NVARCHAR(4000)",
            Self::DateTime => "DATETIME2",
        }
    }
}

/// A stored-procedure invocation with named inputs and typed outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureCall {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<(String, QueryParam)>,
    #[serde(default)]
    pub outputs: Vec<(String, OutputType)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl ProcedureCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout: None,
        }
    }

    /// Add a named input parameter.
    pub fn input(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.inputs.push((name.into(), value.into()));
        self
    }

    /// Declare a named output parameter.
    pub fn output(mut self, name: impl Into<String>, ty: OutputType) -> Self {
        self.outputs.push((name.into(), ty));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Input values in declaration order.
    pub fn input_values(&self) -> Vec<QueryParam> {
        self.inputs.iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Raw outcome of a statement or procedure, before typed decoding.
///
/// Every backend fills it the same way. For text statements `recordsets`
/// holds each result set that produced at least one row; for procedures it
/// holds every result set the procedure produced, empty ones included.
/// `rows_affected` is the row count of the final statement: rows changed, or
/// rows returned when it was a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutcome {
    pub recordsets: Vec<Vec<Record>>,
    pub rows_affected: u64,
    pub output: Record,
    pub return_value: Option<i64>,
}

impl RawOutcome {
    /// An outcome carrying one result set.
    pub fn from_rows(rows: Vec<Record>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            recordsets: if rows.is_empty() { Vec::new() } else { vec![rows] },
            rows_affected,
            ..Default::default()
        }
    }

    /// An outcome carrying only an affected-row count.
    pub fn from_count(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }
}

/// Splits a driver's row stream into result sets at statement boundaries.
#[derive(Debug, Default)]
pub struct RecordsetCollector {
    current: Vec<Record>,
    outcome: RawOutcome,
    keep_empty: bool,
}

impl RecordsetCollector {
    /// Every boundary closes a result set, even one without rows. Use when
    /// each boundary is known to end a result set.
    pub fn keeping_empty() -> Self {
        Self {
            keep_empty: true,
            ..Default::default()
        }
    }

    pub fn push_row(&mut self, row: Record) {
        self.current.push(row);
    }

    /// Close the statement whose rows were pushed since the last call.
    /// `affected` is the driver's count, used when the statement returned no
    /// rows.
    pub fn end_statement(&mut self, affected: u64) {
        self.outcome.rows_affected = if self.current.is_empty() {
            affected
        } else {
            self.current.len() as u64
        };
        if self.keep_empty || !self.current.is_empty() {
            self.outcome.recordsets.push(std::mem::take(&mut self.current));
        }
    }

    pub fn finish(mut self) -> RawOutcome {
        if !self.current.is_empty() {
            self.end_statement(0);
        }
        self.outcome
    }
}

/// Result of `execute` and `call_procedure`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResult<T> {
    /// Every result set that returned rows, in statement order.
    pub recordsets: Vec<Vec<T>>,
    /// Row count of the final statement.
    pub rows_affected: u64,
    /// Named output parameters; empty for text statements.
    pub output: Record,
    /// Procedure return status; `None` for text statements and MySQL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<i64>,
}

impl<T> ExecuteResult<T> {
    /// Rows of the first result set, or nothing.
    pub fn rows(&self) -> &[T] {
        self.recordsets.first().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn into_rows(self) -> Vec<T> {
        self.recordsets.into_iter().next().unwrap_or_default()
    }
}

impl<T: DeserializeOwned> ExecuteResult<T> {
    /// Decode the raw rows into the caller's type.
    pub fn decode(raw: RawOutcome) -> DbResult<Self> {
        Ok(Self {
            recordsets: raw
                .recordsets
                .into_iter()
                .map(decode_records)
                .collect::<DbResult<_>>()?,
            rows_affected: raw.rows_affected,
            output: raw.output,
            return_value: raw.return_value,
        })
    }
}

/// Decode records into `T` via serde.
pub fn decode_records<T: DeserializeOwned>(rows: Vec<Record>) -> DbResult<Vec<T>> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            serde_json::from_value(JsonValue::Object(row))
                .map_err(|e| DbError::decode(format!("row {}: {}", i, e)))
        })
        .collect()
}
