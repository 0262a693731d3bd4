//! Pool creation, retry, single-flight and shutdown through `DbClient`.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeAdapter, TestConnector, fake_client};
use crm_db::config::{QueryLimits, RetryPolicy};
use crm_db::db::DbClient;
use crm_db::error::DbError;
use crm_db::models::{ProcedureCall, QueryParam, Record, Statement};
use crm_db::params;

#[tokio::test]
async fn test_get_pool_twice_returns_same_adapter() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 3);

    let first = client.adapter().await.expect("should connect");
    let second = client.adapter().await.expect("should reuse");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_first_use_creates_one_pool() {
    let mut inner = TestConnector::new(0, FakeAdapter::default());
    inner.connect_delay = Duration::from_millis(50);
    let connector = Arc::new(inner);
    let client = fake_client(connector.clone(), 1);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.query::<Record>("SELECT 1", params![]).await })
        })
        .collect();
    for handle in handles {
        handle.await.expect("task").expect("query should succeed");
    }
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_retry_attempts_then_fails_with_last_error() {
    let connector = TestConnector::failing();
    let client = fake_client(connector.clone(), 3);

    let err = client.open().await.unwrap_err();
    assert_eq!(connector.calls(), 3);
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.to_string().contains("ECONNREFUSED"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_retry_recovers_on_third_attempt() {
    let connector = Arc::new(TestConnector::new(2, FakeAdapter::default()));
    let client = fake_client(connector.clone(), 3);
    client.open().await.expect("third attempt should succeed");
    assert_eq!(connector.calls(), 3);
}

#[tokio::test]
async fn test_oversized_query_rejected_before_pool_access() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);

    let sql = format!("SELECT '{}'", "x".repeat(10_001));
    let err = client.query::<Record>(&sql, params![]).await.unwrap_err();
    assert!(matches!(err, DbError::Validation { .. }));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn test_too_many_params_rejected_before_pool_access() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);

    let placeholders = vec!["?"; 101].join(", ");
    let params: Vec<QueryParam> = (0..101).map(QueryParam::from).collect();
    let err = client
        .execute_non_query(&format!("INSERT INTO t VALUES ({})", placeholders), params)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { .. }));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn test_placeholder_mismatch_rejected_before_pool_access() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);

    let err = client
        .query::<Record>("SELECT * FROM t WHERE a = ? AND b = ?", params![1])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { .. }));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn test_mssql_placeholders_reach_adapter_translated() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);

    client
        .query::<Record>(
            "SELECT * FROM contacts WHERE email = ? AND note = 'why?'",
            params!["ada@example.com"],
        )
        .await
        .expect("should run");

    let seen = connector.adapter.seen_sql.lock().expect("lock").clone();
    assert_eq!(
        seen,
        vec!["SELECT * FROM contacts WHERE email = @P1 AND note = 'why?'".to_string()]
    );
}

#[tokio::test]
async fn test_statement_timeout() {
    let connector = Arc::new(TestConnector::new(
        0,
        FakeAdapter::with_delay(Duration::from_millis(500)),
    ));
    let client = fake_client(connector, 1);

    let statement = Statement::new("SELECT 1").with_timeout(Duration::from_millis(50));
    let err = client.query_statement::<Record>(&statement).await.unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));
    assert!(err.is_retryable());
    // The guard is released when the timed-out future is dropped
    assert_eq!(client.counters().active(), 0);
}

#[tokio::test]
async fn test_statement_timeout_does_not_cut_connect_retries() {
    let mut inner = TestConnector::new(u32::MAX, FakeAdapter::default());
    inner.connect_delay = Duration::from_millis(40);
    let connector = Arc::new(inner);
    let client = DbClient::with_retry(
        connector.clone(),
        QueryLimits::default(),
        RetryPolicy::new(3, Duration::from_millis(20)),
    );

    // Three slow attempts plus backoff take longer than the statement limit
    let statement = Statement::new("SELECT 1").with_timeout(Duration::from_millis(100));
    let err = client.query_statement::<Record>(&statement).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }), "got {err:?}");
    assert!(err.to_string().contains("ECONNREFUSED"));
    assert_eq!(connector.calls(), 3);
    assert_eq!(client.counters().active(), 0);
}

#[tokio::test]
async fn test_health_reports_unreachable_server() {
    let client = fake_client(TestConnector::failing(), 2);
    let status = client.check_health().await;
    assert!(!status.healthy);
    assert!(status.error.as_deref().unwrap_or_default().contains("ECONNREFUSED"));
    assert_eq!(status.active_connections, 0);
}

#[tokio::test]
async fn test_health_counts_operations() {
    let client = fake_client(TestConnector::healthy(), 1);
    client
        .execute_non_query("UPDATE t SET a = 1", params![])
        .await
        .expect("should run");
    let status = client.check_health().await;
    assert!(status.healthy);
    assert_eq!(status.error, None);
    assert_eq!(status.active_connections, 0);
    assert_eq!(status.total_connections, 2);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);
    client.open().await.expect("should connect");

    client.shutdown(Some("SIGINT")).await;
    client.shutdown(Some("SIGTERM")).await;
    client.clone().shutdown(None).await;

    assert!(client.is_shut_down());
    assert_eq!(connector.adapter.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_shutdown_closes_once() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);
    client.open().await.expect("should connect");

    let a = client.clone();
    let b = client.clone();
    tokio::join!(a.shutdown(Some("SIGINT")), b.shutdown(Some("SIGTERM")));
    assert_eq!(connector.adapter.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_operations_after_shutdown_fail() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);
    client.shutdown(None).await;

    let err = client.query::<Record>("SELECT 1", params![]).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert_eq!(connector.calls(), 0);
    assert!(!client.check_health().await.healthy);
}

#[tokio::test]
async fn test_procedure_call_returns_outputs() {
    let client = fake_client(TestConnector::healthy(), 1);
    let call = ProcedureCall::new("dbo.add_contact")
        .input("firstname", "Ada")
        .output("new_id", crm_db::models::OutputType::Int);

    let result = client
        .call_procedure::<Record>(&call)
        .await
        .expect("should call");
    assert_eq!(result.return_value, Some(0));
    assert_eq!(result.output.get("new_id"), Some(&serde_json::json!(42)));
    assert_eq!(result.rows().len(), 1);
}

#[tokio::test]
async fn test_invalid_procedure_name_rejected() {
    let connector = TestConnector::healthy();
    let client = fake_client(connector.clone(), 1);
    let err = client
        .call_procedure::<Record>(&ProcedureCall::new("x; DROP TABLE users"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { .. }));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn test_lazy_client_does_not_connect_until_used() {
    let connector = TestConnector::healthy();
    let client = DbClient::with_retry(
        connector.clone(),
        QueryLimits::default(),
        RetryPolicy::default(),
    );
    assert_eq!(connector.calls(), 0);
    assert_eq!(client.pool_state().await.size, 0);
    client.open().await.expect("should connect");
    assert_eq!(client.pool_state().await.size, 1);
}
