//! Legacy invoices module. Amounts are stored in cents.

use serde::{Deserialize, Serialize};

use crate::db::DbClient;
use crate::error::DbResult;
use crate::models::QueryParam;
use crate::params;
use crate::store::{CountRow, ITEMS_PER_PAGE, de, like_pattern, page_count, page_offset};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestInvoice {
    #[serde(deserialize_with = "de::string_lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub email: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(deserialize_with = "de::f64_lenient")]
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRow {
    #[serde(deserialize_with = "de::string_lenient")]
    pub id: String,
    #[serde(deserialize_with = "de::f64_lenient")]
    pub amount: f64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub status: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub email: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Dashboard totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CardData {
    pub number_of_invoices: i64,
    pub number_of_customers: i64,
    /// Cents.
    pub total_paid: f64,
    /// Cents.
    pub total_pending: f64,
}

#[derive(Debug, Deserialize)]
struct StatusTotals {
    #[serde(default, deserialize_with = "de::opt_f64_lenient")]
    paid: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64_lenient")]
    pending: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct InvoiceStore<'a> {
    client: &'a DbClient,
}

impl<'a> InvoiceStore<'a> {
    pub fn new(client: &'a DbClient) -> Self {
        Self { client }
    }

    /// The five most recent invoices with their customer.
    pub async fn latest(&self) -> DbResult<Vec<LatestInvoice>> {
        let sql = self.client.dialect().limit_rows(
            "SELECT invoices.amount, customers.name, customers.image_url, customers.email, invoices.id \
             FROM invoices JOIN customers ON invoices.customer_id = customers.id \
             ORDER BY invoices.date DESC",
            5,
        );
        self.client.query(&sql, Vec::new()).await
    }

    pub async fn card_data(&self) -> DbResult<CardData> {
        let invoices: Vec<CountRow> = self
            .client
            .query("SELECT COUNT(*) AS total FROM invoices", Vec::new())
            .await?;
        let customers: Vec<CountRow> = self
            .client
            .query("SELECT COUNT(*) AS total FROM customers", Vec::new())
            .await?;
        let totals: Vec<StatusTotals> = self
            .client
            .query(
                "SELECT SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END) AS paid, \
                 SUM(CASE WHEN status = 'pending' THEN amount ELSE 0 END) AS pending \
                 FROM invoices",
                Vec::new(),
            )
            .await?;
        let totals = totals.first();

        Ok(CardData {
            number_of_invoices: invoices.first().map_or(0, |r| r.total),
            number_of_customers: customers.first().map_or(0, |r| r.total),
            total_paid: totals.and_then(|t| t.paid).unwrap_or(0.0),
            total_pending: totals.and_then(|t| t.pending).unwrap_or(0.0),
        })
    }

    fn search_clause(&self) -> String {
        let dialect = self.client.dialect();
        format!(
            "customers.name LIKE ? OR customers.email LIKE ? OR {} LIKE ? OR {} LIKE ? \
             OR invoices.status LIKE ?",
            dialect.cast_to_text("invoices.amount"),
            dialect.date_to_text("invoices.date"),
        )
    }

    fn search_params(term: &str) -> Vec<QueryParam> {
        let pattern = like_pattern(term);
        (0..5).map(|_| QueryParam::from(pattern.as_str())).collect()
    }

    pub async fn fetch_filtered(&self, term: &str, page: u32) -> DbResult<Vec<InvoiceRow>> {
        let dialect = self.client.dialect();
        let sql = format!(
            "SELECT invoices.id, invoices.amount, invoices.date, invoices.status, \
             customers.name, customers.email, customers.image_url \
             FROM invoices JOIN customers ON invoices.customer_id = customers.id \
             WHERE {} ORDER BY invoices.date DESC {}",
            self.search_clause(),
            dialect.paginate()
        );
        let mut params = Self::search_params(term);
        params.extend(dialect.page_params(page_offset(page), ITEMS_PER_PAGE));
        self.client.query(&sql, params).await
    }

    pub async fn fetch_pages(&self, term: &str) -> DbResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM invoices \
             JOIN customers ON invoices.customer_id = customers.id WHERE {}",
            self.search_clause()
        );
        let rows: Vec<CountRow> = self.client.query(&sql, Self::search_params(term)).await?;
        Ok(page_count(rows.first().map_or(0, |r| r.total)))
    }

    pub async fn delete(&self, id: &str) -> DbResult<u64> {
        self.client
            .execute_non_query("DELETE FROM invoices WHERE id = ?", params![id])
            .await
    }
}
