//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crm_db::config::{QueryLimits, RetryPolicy};
use crm_db::db::adapter::{DatabaseAdapter, PoolState};
use crm_db::db::pool::Connector;
use crm_db::db::translate::TranslatedQuery;
use crm_db::db::DbClient;
use crm_db::error::{DbError, DbResult};
use crm_db::models::{Backend, ConnectionSettings, ProcedureCall, RawOutcome, Record};
use serde_json::json;
use tempfile::TempDir;

/// Client over a fresh SQLite file inside `dir`.
pub fn sqlite_client(dir: &TempDir) -> DbClient {
    DbClient::new(
        ConnectionSettings::sqlite(dir.path().join("crm.db")),
        QueryLimits::default(),
    )
}

/// Adapter that answers every query with one `{"value": 1}` row, optionally
/// after a delay, and records the SQL it was given.
#[derive(Default)]
pub struct FakeAdapter {
    pub delay: Duration,
    pub closed: AtomicBool,
    pub close_calls: AtomicU32,
    pub seen_sql: std::sync::Mutex<Vec<String>>,
}

impl FakeAdapter {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    async fn pause(&self, query: &TranslatedQuery) {
        if let Ok(mut seen) = self.seen_sql.lock() {
            seen.push(query.sql.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn one_row() -> Record {
    let mut row = Record::new();
    row.insert("value".into(), json!(1));
    row
}

#[async_trait]
impl DatabaseAdapter for FakeAdapter {
    fn backend(&self) -> Backend {
        Backend::Mssql
    }

    async fn fetch_rows(&self, query: &TranslatedQuery) -> DbResult<Vec<Record>> {
        self.pause(query).await;
        Ok(vec![one_row()])
    }

    async fn execute(&self, query: &TranslatedQuery) -> DbResult<RawOutcome> {
        self.pause(query).await;
        Ok(RawOutcome::from_count(1))
    }

    async fn execute_non_query(&self, query: &TranslatedQuery) -> DbResult<u64> {
        self.pause(query).await;
        Ok(1)
    }

    async fn call_procedure(&self, _call: &ProcedureCall) -> DbResult<RawOutcome> {
        let mut output = Record::new();
        output.insert("new_id".into(), json!(42));
        Ok(RawOutcome {
            recordsets: vec![vec![one_row()]],
            rows_affected: 0,
            output,
            return_value: Some(0),
        })
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn pool_state(&self) -> PoolState {
        PoolState { size: 1, idle: 1 }
    }
}

/// Connector that fails `failures` times before handing out `adapter`.
pub struct TestConnector {
    pub failures: u32,
    pub calls: AtomicU32,
    pub connect_delay: Duration,
    pub adapter: Arc<FakeAdapter>,
}

impl TestConnector {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::new(0, FakeAdapter::default()))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::new(u32::MAX, FakeAdapter::default()))
    }

    pub fn new(failures: u32, adapter: FakeAdapter) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            connect_delay: Duration::ZERO,
            adapter: Arc::new(adapter),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for TestConnector {
    fn backend(&self) -> Backend {
        Backend::Mssql
    }

    async fn connect(&self) -> DbResult<Arc<dyn DatabaseAdapter>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if n <= self.failures {
            return Err(DbError::connection(
                "ECONNREFUSED 10.0.0.1:1433",
                "Check that the server is running",
            ));
        }
        Ok(self.adapter.clone())
    }
}

/// Client over `connector` that retries quickly.
pub fn fake_client(connector: Arc<TestConnector>, attempts: u32) -> DbClient {
    DbClient::with_retry(
        connector,
        QueryLimits::default(),
        RetryPolicy::new(attempts, Duration::from_millis(1)),
    )
}

/// CRM schema plus a small data set.
pub async fn seed_crm(client: &DbClient) -> DbResult<()> {
    let statements = [
        "CREATE TABLE contacts (
            idx INTEGER PRIMARY KEY AUTOINCREMENT,
            contactid TEXT NOT NULL DEFAULT (lower(hex(randomblob(16)))),
            firstname TEXT, lastname TEXT, companyname TEXT, email TEXT,
            phonemobile TEXT, phonemobile2 TEXT, phonehome TEXT, phonehome2 TEXT,
            phonebusiness TEXT, phonebusiness2 TEXT, phoneother TEXT,
            faxbusiness TEXT, faxhome TEXT, pager TEXT, photourl TEXT,
            pwd_ivr INTEGER, saldo REAL DEFAULT 0
        )",
        "CREATE TABLE calls (
            callid INTEGER PRIMARY KEY, contactnumber TEXT, agentextension TEXT,
            description TEXT, calldatetime TEXT, callduration TEXT
        )",
        "CREATE TABLE chats (
            chatid INTEGER PRIMARY KEY, email TEXT, agentextension TEXT, subject TEXT,
            description TEXT, calldatetime TEXT, callduration TEXT
        )",
        "CREATE TABLE rcodes (reason_code INTEGER, reason_description TEXT)",
        "CREATE TABLE users (id TEXT, name TEXT, email TEXT, password TEXT)",
        "CREATE TABLE customers (id TEXT, name TEXT, email TEXT, image_url TEXT)",
        "CREATE TABLE invoices (
            id TEXT PRIMARY KEY, customer_id TEXT, amount INTEGER, status TEXT, date TEXT
        )",
        "INSERT INTO contacts (contactid, firstname, lastname, companyname, email, phonemobile, phonebusiness, phonehome, saldo) VALUES
            ('c-ada', 'Ada', 'Lovelace', 'Analytical', 'ada@example.com', '600 111 222', '555-0100', NULL, 1250.75),
            ('c-alan', 'Alan', 'Turing', 'Bletchley', 'alan@example.com', NULL, '555-0200', NULL, 10),
            ('c-grace', 'Grace', 'Hopper', 'Navy', 'grace@example.com', NULL, '555-0300', '(555) 0301', 0),
            ('c-edsger', 'Edsger', 'Dijkstra', 'TU Eindhoven', 'edsger@example.com', NULL, '555-0400', NULL, 0),
            ('c-barbara', 'Barbara', 'Liskov', 'MIT', 'barbara@example.com', NULL, '555-0500', NULL, 0),
            ('c-donald', 'Donald', 'Knuth', 'Stanford', 'donald@example.com', NULL, '555-0600', NULL, 0),
            ('c-ken', 'Ken', 'Thompson', 'Bell Labs', 'ken@example.com', NULL, '555-0700', NULL, 0)",
        "INSERT INTO calls (callid, contactnumber, agentextension, description, calldatetime, callduration) VALUES
            (1, '555-0100', '201', 'First call', '2024-01-10 09:00:00', '00:03:10'),
            (2, '555-0100', '202', 'Follow up', '2024-02-01 15:30:00', '00:01:05'),
            (3, '555-0200', '201', 'Question', '2024-01-15 11:00:00', '00:05:00')",
        "INSERT INTO chats (chatid, email, agentextension, subject, description, calldatetime, callduration) VALUES
            (1, 'ada@example.com', '301', 'Billing', 'Invoice question', '2024-03-01 10:00:00', '00:10:00')",
        "INSERT INTO rcodes (reason_code, reason_description) VALUES
            (30, 'Complaint'), (10, 'Sales'), (20, 'Support')",
        "INSERT INTO users (id, name, email, password) VALUES
            ('u-1', 'User', 'user@nextmail.com', '$2b$10$hash')",
        "INSERT INTO customers (id, name, email, image_url) VALUES
            ('cu-1', 'Delba de Oliveira', 'delba@oliveira.com', '/customers/delba.png'),
            ('cu-2', 'Lee Robinson', 'lee@robinson.com', '/customers/lee.png')",
        "INSERT INTO invoices (id, customer_id, amount, status, date) VALUES
            ('1', 'cu-1', 15795, 'pending', '2022-12-06'),
            ('2', 'cu-2', 20348, 'pending', '2022-11-14'),
            ('3', 'cu-1', 3040, 'paid', '2022-10-29'),
            ('4', 'cu-2', 44800, 'paid', '2023-09-10'),
            ('5', 'cu-1', 34577, 'pending', '2023-08-05'),
            ('6', 'cu-2', 54246, 'pending', '2023-07-16')",
    ];
    for sql in statements {
        client.execute_non_query(sql, Vec::new()).await?;
    }
    Ok(())
}
