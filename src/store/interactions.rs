//! Call and chat history.
//!
//! Calls are keyed by the contact's business number, chats by email.

use serde::{Deserialize, Serialize};

use crate::db::DbClient;
use crate::error::DbResult;
use crate::params;
use crate::store::contacts::ContactStore;
use crate::store::{CountRow, de};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    #[serde(deserialize_with = "de::i64_lenient")]
    pub callid: i64,
    #[serde(default)]
    pub contactnumber: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_lenient")]
    pub agentextension: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub calldatetime: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_lenient")]
    pub callduration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(deserialize_with = "de::i64_lenient")]
    pub chatid: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_lenient")]
    pub agentextension: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub calldatetime: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string_lenient")]
    pub callduration: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct InteractionStore<'a> {
    client: &'a DbClient,
}

impl<'a> InteractionStore<'a> {
    pub fn new(client: &'a DbClient) -> Self {
        Self { client }
    }

    /// Calls from `number`, newest first.
    pub async fn calls_by_number(&self, number: &str) -> DbResult<Vec<Call>> {
        self.client
            .query(
                "SELECT callid, contactnumber, agentextension, description, calldatetime, callduration \
                 FROM calls WHERE contactnumber = ? ORDER BY calldatetime DESC",
                params![number],
            )
            .await
    }

    /// Chats with `email`, newest first.
    pub async fn chats_by_email(&self, email: &str) -> DbResult<Vec<Chat>> {
        self.client
            .query(
                "SELECT chatid, email, agentextension, subject, description, calldatetime, callduration \
                 FROM chats WHERE email = ? ORDER BY calldatetime DESC",
                params![email],
            )
            .await
    }

    /// Chats for a contact, looked up through its email. Empty when the
    /// contact does not exist or has no email.
    pub async fn chats_by_contact_id(&self, contactid: &str) -> DbResult<Vec<Chat>> {
        let contact = ContactStore::new(self.client).fetch_by_id(contactid).await?;
        match contact.and_then(|c| c.email) {
            Some(email) => self.chats_by_email(&email).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn call_count(&self, number: &str) -> DbResult<i64> {
        let rows: Vec<CountRow> = self
            .client
            .query(
                "SELECT COUNT(*) AS total FROM calls WHERE contactnumber = ?",
                params![number],
            )
            .await?;
        Ok(rows.first().map_or(0, |r| r.total))
    }

    pub async fn chat_count(&self, email: &str) -> DbResult<i64> {
        let rows: Vec<CountRow> = self
            .client
            .query(
                "SELECT COUNT(*) AS total FROM chats WHERE email = ?",
                params![email],
            )
            .await?;
        Ok(rows.first().map_or(0, |r| r.total))
    }
}
