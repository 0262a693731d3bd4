//! CRM repositories against a seeded SQLite database.

mod common;

use common::{seed_crm, sqlite_client};
use crm_db::DbClient;
use crm_db::store::{
    ContactInput, ContactStore, InteractionStore, InvoiceStore, ReasonStore, UserStore,
};
use tempfile::TempDir;

async fn seeded(dir: &TempDir) -> DbClient {
    let client = sqlite_client(dir);
    seed_crm(&client).await.expect("seed");
    client
}

fn first_names(contacts: &[crm_db::store::ContactWithStats]) -> Vec<String> {
    contacts
        .iter()
        .map(|c| c.contact.firstname.clone().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_contacts_paginate_six_per_page() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let store = ContactStore::new(&client);

    assert_eq!(store.fetch_pages("").await.expect("pages"), 2);

    let page1 = store.fetch_filtered("", 1).await.expect("page 1");
    assert_eq!(
        first_names(&page1),
        vec!["Ada", "Alan", "Barbara", "Donald", "Edsger", "Grace"]
    );
    let page2 = store.fetch_filtered("", 2).await.expect("page 2");
    assert_eq!(first_names(&page2), vec!["Ken"]);
}

#[tokio::test]
async fn test_contacts_carry_interaction_counts() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;

    let page = ContactStore::new(&client)
        .fetch_filtered("Lovelace", 1)
        .await
        .expect("filter");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].call_count, 2);
    assert_eq!(page[0].chat_count, 1);
    assert_eq!(page[0].contact.saldo, 1250.75);

    let json = serde_json::to_value(&page[0]).expect("serialize");
    assert_eq!(json["firstname"], "Ada");
    assert_eq!(json["call_count"], 2);
}

#[tokio::test]
async fn test_contact_search_matches_balance_and_company() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let store = ContactStore::new(&client);

    let by_saldo = store.fetch_filtered("1250", 1).await.expect("saldo");
    assert_eq!(first_names(&by_saldo), vec!["Ada"]);

    let by_company = store.fetch_filtered("bell", 1).await.expect("company");
    assert_eq!(first_names(&by_company), vec!["Ken"]);

    assert_eq!(store.fetch_pages("nobody-matches").await.expect("pages"), 0);
    assert!(store
        .fetch_filtered("nobody-matches", 1)
        .await
        .expect("empty")
        .is_empty());
}

#[tokio::test]
async fn test_contact_lookup_by_email_and_phone() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let store = ContactStore::new(&client);

    let ada = store
        .fetch_by_email("  ADA@Example.com ")
        .await
        .expect("email")
        .expect("found");
    assert_eq!(ada.contactid, "c-ada");

    let by_mobile = store.fetch_by_phone("600-111-222").await.expect("phone");
    assert_eq!(by_mobile.map(|c| c.contactid), Some("c-ada".to_string()));

    let by_home = store.fetch_by_phone("555 0301").await.expect("phone");
    assert_eq!(by_home.map(|c| c.contactid), Some("c-grace".to_string()));

    assert_eq!(store.fetch_by_phone("000").await.expect("phone"), None);
    assert_eq!(store.fetch_by_id("missing").await.expect("id"), None);
    assert_eq!(store.fetch_all().await.expect("all").len(), 7);
}

#[tokio::test]
async fn test_contact_create_and_update() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let store = ContactStore::new(&client);

    let input = ContactInput {
        firstname: "Margaret".into(),
        lastname: "Hamilton".into(),
        email: "margaret@example.com".into(),
        saldo: 42.5,
        ..Default::default()
    };
    assert_eq!(store.create(&input).await.expect("create"), 1);

    let created = store
        .fetch_by_email("margaret@example.com")
        .await
        .expect("lookup")
        .expect("created");
    assert!(!created.contactid.is_empty());
    assert_eq!(created.companyname.as_deref(), Some(""));
    assert_eq!(created.saldo, 42.5);

    let update = ContactInput {
        companyname: Some("MIT".into()),
        pwd_ivr: Some(1234),
        ..input
    };
    assert_eq!(
        store.update(&created.contactid, &update).await.expect("update"),
        1
    );
    let updated = store
        .fetch_by_id(&created.contactid)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(updated.companyname.as_deref(), Some("MIT"));
    assert_eq!(updated.pwd_ivr, Some(1234));
}

#[tokio::test]
async fn test_interaction_history() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let interactions = InteractionStore::new(&client);

    let calls = interactions.calls_by_number("555-0100").await.expect("calls");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].calldatetime.as_deref(), Some("2024-02-01 15:30:00"));
    assert_eq!(calls[0].agentextension.as_deref(), Some("202"));

    let chats = interactions.chats_by_contact_id("c-ada").await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].subject.as_deref(), Some("Billing"));

    assert!(interactions
        .chats_by_contact_id("missing")
        .await
        .expect("chats")
        .is_empty());
    assert_eq!(interactions.call_count("555-0200").await.expect("count"), 1);
    assert_eq!(interactions.chat_count("nobody@example.com").await.expect("count"), 0);
}

#[tokio::test]
async fn test_reasons_are_ordered_by_code() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let codes: Vec<i64> = ReasonStore::new(&client)
        .list()
        .await
        .expect("reasons")
        .into_iter()
        .map(|r| r.reason_code)
        .collect();
    assert_eq!(codes, vec![10, 20, 30]);
}

#[tokio::test]
async fn test_user_credentials() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let users = UserStore::new(&client);

    let creds = users
        .find_credentials("user@nextmail.com")
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(creds.user.id, "u-1");
    assert_eq!(creds.password_hash(), Some("$2b$10$hash"));
    assert!(!format!("{:?}", creds).contains("$2b$"));

    assert_eq!(users.find_by_email("nobody@nextmail.com").await.expect("lookup"), None);
}

#[tokio::test]
async fn test_invoice_dashboard() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let invoices = InvoiceStore::new(&client);

    let latest = invoices.latest().await.expect("latest");
    assert_eq!(latest.len(), 5);
    assert_eq!(latest[0].id, "4");
    assert_eq!(latest[0].name, "Lee Robinson");

    let cards = invoices.card_data().await.expect("cards");
    assert_eq!(cards.number_of_invoices, 6);
    assert_eq!(cards.number_of_customers, 2);
    assert_eq!(cards.total_paid, 47840.0);
    assert_eq!(cards.total_pending, 124966.0);
}

#[tokio::test]
async fn test_invoice_filter_and_delete() {
    let dir = TempDir::new().expect("tempdir");
    let client = seeded(&dir).await;
    let invoices = InvoiceStore::new(&client);

    let lee = invoices.fetch_filtered("lee", 1).await.expect("filter");
    assert_eq!(lee.len(), 3);
    assert!(lee.iter().all(|row| row.email == "lee@robinson.com"));

    let paid = invoices.fetch_filtered("paid", 1).await.expect("filter");
    assert_eq!(paid.len(), 2);

    let by_year = invoices.fetch_filtered("2022-1", 1).await.expect("filter");
    assert_eq!(by_year.len(), 3);

    assert_eq!(invoices.fetch_pages("").await.expect("pages"), 1);

    assert_eq!(invoices.delete("3").await.expect("delete"), 1);
    assert_eq!(invoices.delete("3").await.expect("delete"), 0);
    assert_eq!(invoices.card_data().await.expect("cards").total_paid, 44800.0);
}
