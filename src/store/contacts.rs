//! Contact queries.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::db::DbClient;
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use crate::store::interactions::InteractionStore;
use crate::store::{CountRow, ITEMS_PER_PAGE, de, like_pattern, page_count, page_offset};

const CONTACT_COLUMNS: &str = "idx, contactid, firstname, lastname, companyname, email, \
     phonemobile, phonemobile2, phonehome, phonehome2, phonebusiness, phonebusiness2, \
     phoneother, faxbusiness, faxhome, pager, photourl, pwd_ivr, saldo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(deserialize_with = "de::i64_lenient")]
    pub idx: i64,
    /// Server-generated; a GUID on SQL Server.
    #[serde(deserialize_with = "de::string_lenient")]
    pub contactid: String,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub companyname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phonemobile: Option<String>,
    #[serde(default)]
    pub phonemobile2: Option<String>,
    #[serde(default)]
    pub phonehome: Option<String>,
    #[serde(default)]
    pub phonehome2: Option<String>,
    #[serde(default)]
    pub phonebusiness: Option<String>,
    #[serde(default)]
    pub phonebusiness2: Option<String>,
    #[serde(default)]
    pub phoneother: Option<String>,
    #[serde(default)]
    pub faxbusiness: Option<String>,
    #[serde(default)]
    pub faxhome: Option<String>,
    #[serde(default)]
    pub pager: Option<String>,
    #[serde(default)]
    pub photourl: Option<String>,
    #[serde(default, deserialize_with = "de::opt_i64_lenient")]
    pub pwd_ivr: Option<i64>,
    #[serde(default, deserialize_with = "de::f64_lenient")]
    pub saldo: f64,
}

/// A contact with its interaction counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactWithStats {
    #[serde(flatten)]
    pub contact: Contact,
    pub call_count: i64,
    pub chat_count: i64,
}

/// Fields written by `create` and `update`. Blank optional fields are stored
/// as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInput {
    pub firstname: String,
    pub lastname: String,
    pub companyname: Option<String>,
    pub email: String,
    pub phonemobile: Option<String>,
    pub phonebusiness: Option<String>,
    pub saldo: f64,
    pub photourl: Option<String>,
    /// Only written by `update`.
    pub pwd_ivr: Option<i64>,
}

fn or_empty(value: &Option<String>) -> QueryParam {
    QueryParam::String(value.clone().unwrap_or_default())
}

/// Strip the punctuation people type into phone numbers.
pub fn clean_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect()
}

fn stripped(column: &str) -> String {
    format!(
        "REPLACE(REPLACE(REPLACE(REPLACE({}, ' ', ''), '-', ''), '(', ''), ')', '')",
        column
    )
}

#[derive(Debug, Clone, Copy)]
pub struct ContactStore<'a> {
    client: &'a DbClient,
}

impl<'a> ContactStore<'a> {
    pub fn new(client: &'a DbClient) -> Self {
        Self { client }
    }

    fn search_clause(&self) -> String {
        let saldo = self.client.dialect().cast_to_text("saldo");
        format!(
            "firstname LIKE ? OR lastname LIKE ? OR companyname LIKE ? OR email LIKE ? \
             OR phonemobile LIKE ? OR phonebusiness LIKE ? OR {} LIKE ?",
            saldo
        )
    }

    fn search_params(term: &str) -> Vec<QueryParam> {
        let pattern = like_pattern(term);
        (0..7).map(|_| QueryParam::from(pattern.as_str())).collect()
    }

    /// One page of contacts matching `term`, each with call and chat counts.
    pub async fn fetch_filtered(&self, term: &str, page: u32) -> DbResult<Vec<ContactWithStats>> {
        let dialect = self.client.dialect();
        let sql = format!(
            "SELECT {} FROM contacts WHERE {} ORDER BY firstname, lastname {}",
            CONTACT_COLUMNS,
            self.search_clause(),
            dialect.paginate()
        );
        let mut params = Self::search_params(term);
        params.extend(dialect.page_params(page_offset(page), ITEMS_PER_PAGE));

        let contacts: Vec<Contact> = self.client.query(&sql, params).await?;

        let interactions = InteractionStore::new(self.client);
        try_join_all(contacts.into_iter().map(|contact| async move {
            let call_count = interactions
                .call_count(contact.phonebusiness.as_deref().unwrap_or_default())
                .await?;
            let chat_count = interactions
                .chat_count(contact.email.as_deref().unwrap_or_default())
                .await?;
            Ok::<_, DbError>(ContactWithStats {
                contact,
                call_count,
                chat_count,
            })
        }))
        .await
    }

    /// Number of pages `fetch_filtered` can return for `term`.
    pub async fn fetch_pages(&self, term: &str) -> DbResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM contacts WHERE {}",
            self.search_clause()
        );
        let rows: Vec<CountRow> = self.client.query(&sql, Self::search_params(term)).await?;
        Ok(page_count(rows.first().map_or(0, |r| r.total)))
    }

    pub async fn fetch_by_id(&self, contactid: &str) -> DbResult<Option<Contact>> {
        let sql = format!("SELECT {} FROM contacts WHERE contactid = ?", CONTACT_COLUMNS);
        let rows: Vec<Contact> = self.client.query(&sql, crate::params![contactid]).await?;
        Ok(rows.into_iter().next())
    }

    /// Case-insensitive match on the trimmed address.
    pub async fn fetch_by_email(&self, email: &str) -> DbResult<Option<Contact>> {
        let sql = self.client.dialect().first_row(&format!(
            "SELECT {} FROM contacts WHERE LOWER(email) = LOWER(?)",
            CONTACT_COLUMNS
        ));
        let rows: Vec<Contact> = self.client.query(&sql, crate::params![email.trim()]).await?;
        Ok(rows.into_iter().next())
    }

    /// Match against mobile, business or home number, ignoring spaces,
    /// dashes and parentheses on both sides.
    pub async fn fetch_by_phone(&self, phone: &str) -> DbResult<Option<Contact>> {
        let clean = clean_phone(phone);
        let sql = self.client.dialect().first_row(&format!(
            "SELECT {} FROM contacts WHERE {} = ? OR {} = ? OR {} = ?",
            CONTACT_COLUMNS,
            stripped("phonemobile"),
            stripped("phonebusiness"),
            stripped("phonehome"),
        ));
        let rows: Vec<Contact> = self
            .client
            .query(&sql, crate::params![clean.as_str(), clean.as_str(), clean.as_str()])
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn fetch_all(&self) -> DbResult<Vec<Contact>> {
        let sql = format!(
            "SELECT {} FROM contacts ORDER BY firstname, lastname",
            CONTACT_COLUMNS
        );
        self.client.query(&sql, Vec::new()).await
    }

    /// Insert a contact. The id is generated by the server.
    pub async fn create(&self, input: &ContactInput) -> DbResult<u64> {
        self.client
            .execute_non_query(
                "INSERT INTO contacts (firstname, lastname, companyname, email, \
                 phonemobile, phonebusiness, saldo, photourl) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    QueryParam::from(input.firstname.as_str()),
                    QueryParam::from(input.lastname.as_str()),
                    or_empty(&input.companyname),
                    QueryParam::from(input.email.as_str()),
                    or_empty(&input.phonemobile),
                    or_empty(&input.phonebusiness),
                    QueryParam::Float(input.saldo),
                    or_empty(&input.photourl),
                ],
            )
            .await
    }

    pub async fn update(&self, contactid: &str, input: &ContactInput) -> DbResult<u64> {
        self.client
            .execute_non_query(
                "UPDATE contacts SET firstname = ?, lastname = ?, companyname = ?, email = ?, \
                 phonemobile = ?, phonebusiness = ?, saldo = ?, photourl = ?, pwd_ivr = ? \
                 WHERE contactid = ?",
                vec![
                    QueryParam::from(input.firstname.as_str()),
                    QueryParam::from(input.lastname.as_str()),
                    or_empty(&input.companyname),
                    QueryParam::from(input.email.as_str()),
                    or_empty(&input.phonemobile),
                    or_empty(&input.phonebusiness),
                    QueryParam::Float(input.saldo),
                    or_empty(&input.photourl),
                    QueryParam::Int(input.pwd_ivr.unwrap_or(0)),
                    QueryParam::from(contactid),
                ],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_phone() {
        assert_eq!(clean_phone(" (555) 123-4567 "), "5551234567");
        assert_eq!(clean_phone("+34 600\t000"), "+34600000");
    }

    #[test]
    fn test_stripped_expression() {
        assert_eq!(
            stripped("phonehome"),
            "REPLACE(REPLACE(REPLACE(REPLACE(phonehome, ' ', ''), '-', ''), '(', ''), ')', '')"
        );
    }

    #[test]
    fn test_contact_decodes_decimal_string_and_guid() {
        let contact: Contact = serde_json::from_value(json!({
            "idx": 3,
            "contactid": "6F9619FF-8B86-D011-B42D-00C04FC964FF",
            "firstname": "Ada",
            "lastname": "Lovelace",
            "email": "ada@example.com",
            "saldo": "1250.75",
            "pwd_ivr": null
        }))
        .expect("should decode");
        assert_eq!(contact.saldo, 1250.75);
        assert_eq!(contact.pwd_ivr, None);
        assert!(contact.phonemobile.is_none());
    }

    #[test]
    fn test_contact_with_stats_flattens() {
        let contact: Contact =
            serde_json::from_value(json!({"idx": 1, "contactid": 1, "saldo": 0}))
                .expect("should decode");
        let value = serde_json::to_value(ContactWithStats {
            contact,
            call_count: 2,
            chat_count: 0,
        })
        .expect("should serialize");
        assert_eq!(value["contactid"], "1");
        assert_eq!(value["call_count"], 2);
    }
}
