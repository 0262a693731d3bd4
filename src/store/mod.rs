//! Typed repositories over [`DbClient`](crate::db::DbClient).
//!
//! Each store borrows a client and issues the application's queries, using
//! the client's [`Dialect`] where the backends disagree on syntax.

pub mod contacts;
pub mod dialect;
pub mod interactions;
pub mod invoices;
pub mod reasons;
pub mod users;

pub use contacts::{Contact, ContactInput, ContactStore, ContactWithStats};
pub use dialect::Dialect;
pub use interactions::{Call, Chat, InteractionStore};
pub use invoices::{CardData, InvoiceRow, InvoiceStore, LatestInvoice};
pub use reasons::{Reason, ReasonStore};
pub use users::{User, UserCredentials, UserStore};

/// Rows per page in paginated listings.
pub const ITEMS_PER_PAGE: i64 = 6;

/// `%term%` for a `LIKE` match.
pub(crate) fn like_pattern(term: &str) -> String {
    format!("%{}%", term)
}

/// Pages needed for `count` rows.
pub(crate) fn page_count(count: i64) -> i64 {
    if count <= 0 {
        return 0;
    }
    (count + ITEMS_PER_PAGE - 1) / ITEMS_PER_PAGE
}

/// Zero-based offset of a one-based page number.
pub(crate) fn page_offset(page: u32) -> i64 {
    (i64::from(page.max(1)) - 1) * ITEMS_PER_PAGE
}

/// Lenient deserializers for values whose JSON shape depends on the backend.
///
/// Decimals arrive as strings (to keep precision), `COUNT(*)` may be any
/// integer width, identifiers may be numbers or GUID strings. NULL reads as
/// zero or `None`; any other value that does not parse is an error.
pub(crate) mod de {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn parse_non_null<T, E: Error>(
        value: &Value,
        parse: fn(&Value) -> Option<T>,
        expected: &str,
    ) -> Result<Option<T>, E> {
        if value.is_null() {
            return Ok(None);
        }
        parse(value)
            .map(Some)
            .ok_or_else(|| E::custom(format!("expected {}, found {}", expected, value)))
    }

    fn to_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn f64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(opt_f64_lenient(d)?.unwrap_or(0.0))
    }

    pub fn opt_f64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(d)?;
        parse_non_null(&value, to_f64, "a number")
    }

    fn to_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn i64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(opt_i64_lenient(d)?.unwrap_or(0))
    }

    pub fn opt_i64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(d)?;
        parse_non_null(&value, to_i64, "an integer")
    }

    pub fn opt_string_lenient<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<String>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    pub fn string_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_string_lenient(d)?.unwrap_or_default())
    }
}

/// `{ "total": n }` rows from `COUNT(*) AS total`.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct CountRow {
    #[serde(deserialize_with = "de::i64_lenient")]
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(page_count(0), 0);
        assert_eq!(page_count(1), 1);
        assert_eq!(page_count(6), 1);
        assert_eq!(page_count(7), 2);
    }

    #[test]
    fn test_page_offset_is_one_based() {
        assert_eq!(page_offset(0), 0);
        assert_eq!(page_offset(1), 0);
        assert_eq!(page_offset(3), 12);
    }

    #[derive(Debug, Deserialize)]
    struct Money {
        #[serde(deserialize_with = "de::f64_lenient")]
        amount: f64,
        #[serde(default, deserialize_with = "de::opt_string_lenient")]
        id: Option<String>,
    }

    #[test]
    fn test_lenient_decimal_and_id() {
        let m: Money = serde_json::from_value(json!({"amount": "125.50", "id": 7})).unwrap();
        assert_eq!(m.amount, 125.5);
        assert_eq!(m.id.as_deref(), Some("7"));

        let m: Money = serde_json::from_value(json!({"amount": 3})).unwrap();
        assert_eq!(m.amount, 3.0);
        assert_eq!(m.id, None);
    }

    #[test]
    fn test_count_row_accepts_strings() {
        let row: CountRow = serde_json::from_value(json!({"total": "42"})).unwrap();
        assert_eq!(row.total, 42);
    }

    #[test]
    fn test_null_reads_as_zero() {
        let row: CountRow = serde_json::from_value(json!({"total": null})).unwrap();
        assert_eq!(row.total, 0);
        let m: Money = serde_json::from_value(json!({"amount": null})).unwrap();
        assert_eq!(m.amount, 0.0);
    }

    #[test]
    fn test_unparseable_numbers_are_errors() {
        let err = serde_json::from_value::<CountRow>(json!({"total": "lots"})).unwrap_err();
        assert!(err.to_string().contains("expected an integer"));

        let err = serde_json::from_value::<Money>(json!({"amount": "12,50"})).unwrap_err();
        assert!(err.to_string().contains("expected a number"));

        assert!(serde_json::from_value::<Money>(json!({"amount": [1]})).is_err());
    }
}
