//! Row-to-record conversion.
//!
//! Every backend hands rows back as [`Record`]s (column name to JSON value)
//! so callers see one shape regardless of driver. sqlx rows are read by the
//! [`ColumnKind`] of their declared type; SQL Server cells carry their own
//! type and are matched directly.

use crate::models::{Backend, Record};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Timestamp layout used for every backend's date-time columns.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// How a column's values are read out of a driver row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    /// Exact text, so money amounts keep every digit.
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    DateTime,
    Date,
    Time,
    /// Expression columns with no declared type.
    Unknown,
}

/// Map a driver type name such as `BIGINT UNSIGNED` or `DECIMAL(10,2)` to the
/// kind its values decode as.
pub fn column_kind(type_name: &str, backend: Backend) -> ColumnKind {
    let upper = type_name.trim().to_ascii_uppercase();
    let base = upper.split([' ', '(']).next().unwrap_or_default();
    match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
            ColumnKind::Integer
        }
        // MySQL reports TINYINT(1) as BOOLEAN
        "BOOL" | "BOOLEAN" | "BIT" => ColumnKind::Boolean,
        "FLOAT" | "DOUBLE" | "REAL" => ColumnKind::Float,
        // SQLite keeps NUMERIC values as REAL or INTEGER
        "DECIMAL" | "NUMERIC" if backend == Backend::Sqlite => ColumnKind::Float,
        "DECIMAL" | "NUMERIC" => ColumnKind::Decimal,
        "JSON" => ColumnKind::Json,
        "DATETIME" | "TIMESTAMP" => ColumnKind::DateTime,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            ColumnKind::Text
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            ColumnKind::Binary
        }
        _ => ColumnKind::Unknown,
    }
}

/// A MySQL DECIMAL column read as its exact text.
#[derive(Debug)]
struct DecimalText(String);

impl Type<sqlx::MySql> for DecimalText {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        column_kind(ty.name(), Backend::Mysql) == ColumnKind::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for DecimalText {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <&str as Decode<sqlx::MySql>>::decode(value).map(|s| DecimalText(s.to_string()))
    }
}

/// Binary columns are returned base64-encoded.
pub fn base64_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn datetime_value(v: chrono::NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format(DATETIME_FORMAT).to_string())
}

/// Conversion of a driver row into a [`Record`].
pub trait RowToJson {
    fn to_record(&self) -> Record;
}

impl RowToJson for MySqlRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let kind = column_kind(col.type_info().name(), Backend::Mysql);
                (col.name().to_string(), mysql::decode_column(self, idx, kind))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let kind = column_kind(col.type_info().name(), Backend::Sqlite);
                (col.name().to_string(), sqlite::decode_column(self, idx, kind))
            })
            .collect()
    }
}

impl RowToJson for tiberius::Row {
    fn to_record(&self) -> Record {
        self.cells()
            .enumerate()
            .map(|(idx, (col, data))| (col.name().to_string(), mssql::decode_cell(self, idx, data)))
            .collect()
    }
}

mod mysql {
    use super::*;

    /// `Some(None)` for SQL NULL, `None` when `T` cannot decode the column.
    fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> Option<Option<T>>
    where
        T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        row.try_get::<Option<T>, _>(idx).ok()
    }

    fn formatted<'r, T, F>(row: &'r MySqlRow, idx: usize, format: F) -> Option<Option<JsonValue>>
    where
        T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
        F: Fn(T) -> JsonValue,
    {
        get::<T>(row, idx).map(|v| v.map(format))
    }

    pub fn decode_column(row: &MySqlRow, idx: usize, kind: ColumnKind) -> JsonValue {
        let decoded = match kind {
            ColumnKind::Decimal => formatted(row, idx, |d: DecimalText| JsonValue::String(d.0)),
            // Signed first; UNSIGNED columns only decode as u64
            ColumnKind::Integer => formatted(row, idx, |v: i64| JsonValue::from(v))
                .or_else(|| formatted(row, idx, |v: u64| JsonValue::from(v))),
            ColumnKind::Boolean => formatted(row, idx, JsonValue::Bool),
            ColumnKind::Float => formatted(row, idx, float_value)
                .or_else(|| formatted(row, idx, |v: f32| float_value(f64::from(v)))),
            ColumnKind::Binary => formatted(row, idx, |v: Vec<u8>| base64_value(&v)),
            ColumnKind::Json => get::<JsonValue>(row, idx),
            ColumnKind::DateTime => formatted(row, idx, datetime_value),
            ColumnKind::Date => formatted(row, idx, |v: chrono::NaiveDate| {
                JsonValue::String(v.format(DATE_FORMAT).to_string())
            }),
            ColumnKind::Time => formatted(row, idx, |v: chrono::NaiveTime| {
                JsonValue::String(v.format(TIME_FORMAT).to_string())
            }),
            ColumnKind::Text | ColumnKind::Unknown => None,
        };

        match decoded {
            Some(value) => value.unwrap_or(JsonValue::Null),
            None => {
                if !matches!(kind, ColumnKind::Text | ColumnKind::Unknown) {
                    tracing::debug!(column = idx, ?kind, "Falling back to text decoding");
                }
                get::<String>(row, idx).flatten().map(JsonValue::String).unwrap_or(JsonValue::Null)
            }
        }
    }
}

mod sqlite {
    use super::*;

    fn read<'r, T, F>(row: &'r SqliteRow, idx: usize, format: F) -> JsonValue
    where
        T: Decode<'r, sqlx::Sqlite> + Type<sqlx::Sqlite>,
        F: FnOnce(T) -> JsonValue,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(Some(v)) => format(v),
            Ok(None) => JsonValue::Null,
            // SQLite lets a value's storage class differ from its column type
            Err(_) => decode_dynamic(row, idx),
        }
    }

    pub fn decode_column(row: &SqliteRow, idx: usize, kind: ColumnKind) -> JsonValue {
        match kind {
            ColumnKind::Integer => read(row, idx, |v: i64| JsonValue::from(v)),
            ColumnKind::Boolean => read(row, idx, JsonValue::Bool),
            ColumnKind::Float | ColumnKind::Decimal => read(row, idx, float_value),
            ColumnKind::Binary => read(row, idx, |v: Vec<u8>| base64_value(&v)),
            // Untyped expressions (COUNT(*), CAST(...)) report NULL/unknown
            // type names; take whatever storage class the value has.
            ColumnKind::Unknown => decode_dynamic(row, idx),
            _ => read(row, idx, JsonValue::String),
        }
    }

    fn decode_dynamic(row: &SqliteRow, idx: usize) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(_) => return JsonValue::Null,
        };
        match storage.as_str() {
            "INTEGER" => row
                .try_get_unchecked::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| base64_value(&v))
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

mod mssql {
    use super::*;
    use tiberius::ColumnData;

    pub fn decode_cell(row: &tiberius::Row, idx: usize, data: &ColumnData<'static>) -> JsonValue {
        match data {
            ColumnData::U8(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::I16(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::I32(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::I64(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::F32(v) => v.map(|v| float_value(v as f64)).unwrap_or(JsonValue::Null),
            ColumnData::F64(v) => v.map(float_value).unwrap_or(JsonValue::Null),
            ColumnData::Bit(v) => v.map(JsonValue::Bool).unwrap_or(JsonValue::Null),
            ColumnData::String(v) => v
                .as_ref()
                .map(|s| JsonValue::String(s.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::Guid(v) => v
                .map(|g| JsonValue::String(g.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::Binary(v) => v
                .as_ref()
                .map(|b| base64_value(b))
                .unwrap_or(JsonValue::Null),
            // Same representation as MySQL DECIMAL: exact text
            ColumnData::Numeric(v) => v
                .map(|n| JsonValue::String(n.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::Xml(v) => v
                .as_ref()
                .map(|x| JsonValue::String(x.as_ref().clone().into_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
                match row.try_get::<chrono::NaiveDateTime, _>(idx) {
                    Ok(Some(v)) => datetime_value(v),
                    _ => JsonValue::Null,
                }
            }
            ColumnData::DateTimeOffset(_) => {
                match row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
                    Ok(Some(v)) => datetime_value(v.naive_utc()),
                    _ => JsonValue::Null,
                }
            }
            ColumnData::Date(_) => match row.try_get::<chrono::NaiveDate, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.format(DATE_FORMAT).to_string()),
                _ => JsonValue::Null,
            },
            ColumnData::Time(_) => match row.try_get::<chrono::NaiveTime, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.format(TIME_FORMAT).to_string()),
                _ => JsonValue::Null,
            },
            #[allow(unreachable_patterns)]
            _ => JsonValue::Null,
        }
    }
}
