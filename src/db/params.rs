//! Binding `QueryParam` values onto driver queries.

use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

use crate::models::QueryParam;

/// Bind one value onto a sqlx query (MySQL or SQLite).
///
/// NULL is sent as a text NULL; both drivers accept it for any column type.
pub(crate) fn bind_sqlx_param<'q, DB>(
    query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    param: &'q QueryParam,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind one value onto a tiberius query.
///
/// Ordinal parameters are named `@P1..@Pn` in bind order, so values go in
/// the order the translator produced them.
pub(crate) fn bind_mssql_param<'a>(query: &mut tiberius::Query<'a>, param: &'a QueryParam) {
    match param {
        QueryParam::Null => query.bind(Option::<&str>::None),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}
