//! User lookups for the credential check.
//!
//! Password hashing and comparison belong to the caller; this store only
//! reads the stored hash.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::db::DbClient;
use crate::error::DbResult;
use crate::params;
use crate::store::de;

const USER_QUERY: &str = "SELECT id, name, email, password FROM users WHERE email = ?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "de::string_lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    pub email: String,
}

/// A user row including the stored password hash.
#[derive(Clone, Deserialize)]
pub struct UserCredentials {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub password: Option<String>,
}

impl UserCredentials {
    /// The stored hash, if one is set and non-empty.
    pub fn password_hash(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UserStore<'a> {
    client: &'a DbClient,
}

impl<'a> UserStore<'a> {
    pub fn new(client: &'a DbClient) -> Self {
        Self { client }
    }

    /// The user without the password column.
    pub async fn find_by_email(&self, email: &str) -> DbResult<Option<User>> {
        Ok(self.find_credentials(email).await?.map(|c| c.user))
    }

    /// The user plus stored hash, for the caller's credential check.
    pub async fn find_credentials(&self, email: &str) -> DbResult<Option<UserCredentials>> {
        let rows: Vec<UserCredentials> = self.client.query(USER_QUERY, params![email]).await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_debug_hides_hash() {
        let creds: UserCredentials = serde_json::from_value(json!({
            "id": "410544b2-4001-4271-9855-fec4b6a6442a",
            "name": "User",
            "email": "user@nextmail.com",
            "password": "$2b$10$abcdefghijklmnopqrstuv"
        }))
        .expect("should decode");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("$2b$"));
        assert_eq!(creds.password_hash(), Some("$2b$10$abcdefghijklmnopqrstuv"));
    }

    #[test]
    fn test_empty_password_is_no_hash() {
        let creds: UserCredentials = serde_json::from_value(json!({
            "id": 1, "name": "x", "email": "x@y.z", "password": ""
        }))
        .expect("should decode");
        assert_eq!(creds.password_hash(), None);
        assert_eq!(creds.user.id, "1");
    }
}
