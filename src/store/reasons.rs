//! Call reason codes.

use serde::{Deserialize, Serialize};

use crate::db::DbClient;
use crate::error::DbResult;
use crate::store::de;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    #[serde(deserialize_with = "de::i64_lenient")]
    pub reason_code: i64,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub reason_description: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReasonStore<'a> {
    client: &'a DbClient,
}

impl<'a> ReasonStore<'a> {
    pub fn new(client: &'a DbClient) -> Self {
        Self { client }
    }

    /// Every reason code, ordered by code.
    pub async fn list(&self) -> DbResult<Vec<Reason>> {
        self.client
            .query(
                "SELECT reason_code, reason_description FROM rcodes ORDER BY reason_code",
                Vec::new(),
            )
            .await
    }
}
