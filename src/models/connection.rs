//! Connection-related data models.
//!
//! This module defines the backend selector and the resolved connection
//! settings that adapters are built from.

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::PoolOptions;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Includes MariaDB
    #[default]
    Mysql,
    /// Microsoft SQL Server / Azure SQL
    Mssql,
    /// Embedded file database, used for local development and tests
    Sqlite,
}

impl Backend {
    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Mysql => "MySQL",
            Self::Mssql => "SQL Server",
            Self::Sqlite => "SQLite",
        }
    }

    /// Get the default port for this backend.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Mysql => Some(3306),
            Self::Mssql => Some(1433),
            Self::Sqlite => None,
        }
    }

    fn scheme(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mssql => "mssql",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Which configured server identity is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Cloud,
    Local,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Fully resolved settings for one backend connection.
///
/// Built once from [`crate::config::Config`]. Exactly one target is active.
#[derive(Clone, Serialize)]
pub struct ConnectionSettings {
    pub backend: Backend,
    pub target: Target,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    /// CA for verifying the server certificate: inline PEM or a file path.
    pub ca_cert: Option<String>,
    /// Only used by the SQLite backend.
    pub sqlite_path: PathBuf,
    pub pool: PoolOptions,
}

impl ConnectionSettings {
    /// Settings for an embedded SQLite file.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Sqlite,
            target: Target::Local,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            encrypt: false,
            trust_server_certificate: false,
            ca_cert: None,
            sqlite_path: path.into(),
            pool: PoolOptions::default(),
        }
    }

    /// Replace the pool options.
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Whether `ca_cert` holds the certificate itself rather than a path.
    pub fn ca_cert_is_inline(&self) -> bool {
        self.ca_cert
            .as_deref()
            .is_some_and(|c| c.trim_start().starts_with("-----BEGIN"))
    }

    /// A display-safe URL for logs (password masked).
    pub fn display_url(&self) -> String {
        if self.backend == Backend::Sqlite {
            return format!("sqlite://{}", self.sqlite_path.display());
        }

        let base = format!("{}://{}:{}", self.backend.scheme(), self.host, self.port);
        match Url::parse(&base) {
            Ok(mut url) => {
                let _ = url.set_username(&self.user);
                if !self.password.is_empty() {
                    let _ = url.set_password(Some("****"));
                }
                url.set_path(&self.database);
                url.to_string()
            }
            Err(_) => format!(
                "{}://{}@{}/{}",
                self.backend.scheme(),
                self.user,
                self.host,
                self.database
            ),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("backend", &self.backend)
            .field("target", &self.target)
            .field("url", &self.display_url())
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<set>"))
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_settings() -> ConnectionSettings {
        ConnectionSettings {
            backend: Backend::Mysql,
            target: Target::Cloud,
            host: "db.example.com".into(),
            port: 3306,
            user: "crm".into(),
            password: "s3cret".into(),
            database: "crmprod".into(),
            encrypt: true,
            trust_server_certificate: false,
            ca_cert: None,
            sqlite_path: PathBuf::new(),
            pool: PoolOptions::default(),
        }
    }

    #[test]
    fn test_backend_default_port() {
        assert_eq!(Backend::Mysql.default_port(), Some(3306));
        assert_eq!(Backend::Mssql.default_port(), Some(1433));
        assert_eq!(Backend::Sqlite.default_port(), None);
    }

    #[test]
    fn test_display_url_masks_password() {
        let url = mysql_settings().display_url();
        assert!(!url.contains("s3cret"));
        assert!(url.contains("****"));
        assert!(url.contains("db.example.com:3306"));
        assert!(url.ends_with("/crmprod"));
    }

    #[test]
    fn test_debug_never_prints_password() {
        let debug = format!("{:?}", mysql_settings());
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_serialize_skips_password() {
        let json = serde_json::to_string(&mysql_settings()).expect("should serialize");
        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"backend\":\"mysql\""));
    }

    #[test]
    fn test_ca_cert_inline_detection() {
        let mut settings = mysql_settings();
        settings.ca_cert = Some("-----BEGIN CERTIFICATE-----\nMIIB...".into());
        assert!(settings.ca_cert_is_inline());
        settings.ca_cert = Some("/etc/ssl/ca.pem".into());
        assert!(!settings.ca_cert_is_inline());
    }

    #[test]
    fn test_sqlite_display_url() {
        let settings = ConnectionSettings::sqlite("/tmp/crm.db");
        assert_eq!(settings.display_url(), "sqlite:///tmp/crm.db");
    }
}
