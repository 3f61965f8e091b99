//! End-to-end pipeline tests.
//!
//! sms table -> change feed -> processor -> transactions table / dead letters,
//! all in memory.

mod common;

use std::time::Duration;

use common::{pipeline, send_sms, OP_TIMEOUT};
use finance_pipeline::capability::grants;
use finance_pipeline::dlq::META_ERROR_KIND;
use finance_pipeline::model::{transaction_id_for, CategoryMapping, SourceRecord};
use finance_pipeline::services;
use finance_pipeline::storage::{CategoryStore, ScopedStores, SourceStore, TransactionStore};

// ============================================================================
// Processing
// ============================================================================

#[tokio::test]
async fn test_sms_becomes_categorized_transaction() {
    let mut p = pipeline().await;
    p.tables
        .categories
        .upsert(&CategoryMapping::new("Coffee Shop", "Food"))
        .await
        .unwrap();

    send_sms(&p.tables, "sms-1", "Coffee Shop", "4.50").await;
    send_sms(&p.tables, "sms-2", "Book Store", "12").await;

    let report = p.feed.pump().await.unwrap();
    assert_eq!(report.succeeded, 2);

    let coffee = p
        .tables
        .transactions
        .get(&transaction_id_for("sms-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coffee.category.as_deref(), Some("Food"));
    assert_eq!(coffee.amount.to_string(), "4.50");

    let books = p
        .tables
        .transactions
        .get(&transaction_id_for("sms-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(books.category, None);

    // Processing never creates mappings.
    assert!(p.tables.categories.get("Book Store").await.unwrap().is_none());
    assert!(p.dead_letters.try_recv().is_err());
}

#[tokio::test]
async fn test_redelivered_sms_is_written_once() {
    let p = pipeline().await;

    // The same source record committed twice reaches the handler twice.
    send_sms(&p.tables, "sms-1", "Coffee Shop", "4.50").await;
    send_sms(&p.tables, "sms-1", "Coffee Shop", "4.50").await;

    let report = p.feed.pump().await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(p.tables.transactions.len().await, 1);
}

#[tokio::test]
async fn test_transient_outage_is_absorbed_by_retry() {
    let mut p = pipeline().await;
    p.tables.transactions.faults().fail_next(1).await;

    send_sms(&p.tables, "sms-1", "Coffee Shop", "4.50").await;

    let report = p.feed.pump().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(p.tables.transactions.len().await, 1);
    assert!(p.dead_letters.try_recv().is_err());
}

// ============================================================================
// Dead Letters
// ============================================================================

#[tokio::test]
async fn test_persistent_outage_dead_letters_after_two_attempts() {
    let mut p = pipeline().await;
    p.tables.transactions.faults().set_unavailable(true).await;

    send_sms(&p.tables, "sms-1", "Coffee Shop", "4.50").await;

    let report = p.feed.pump().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dead_lettered, 1);

    let entry = p.dead_letters.recv().await.unwrap();
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.source_id(), Some("sms-1"));
    assert_eq!(
        entry.metadata.get(META_ERROR_KIND).map(String::as_str),
        Some("store_unavailable")
    );

    // The event is not redelivered once the store recovers.
    p.tables.transactions.faults().set_unavailable(false).await;
    assert!(p.feed.pump().await.unwrap().is_idle());
    assert!(p.tables.transactions.is_empty().await);
}

#[tokio::test]
async fn test_malformed_sms_dead_letters_immediately() {
    let mut p = pipeline().await;
    p.tables
        .sms
        .append(SourceRecord::new("sms-bad", b"{not json".to_vec()))
        .await
        .unwrap();
    send_sms(&p.tables, "sms-good", "Coffee Shop", "1").await;

    let report = p.feed.pump().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.succeeded, 1);

    let entry = p.dead_letters.recv().await.unwrap();
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.original_payload, b"{not json".to_vec());
    assert_eq!(
        entry.metadata.get(META_ERROR_KIND).map(String::as_str),
        Some("malformed_payload")
    );
}

#[tokio::test]
async fn test_slow_store_times_out_and_dead_letters() {
    let mut p = pipeline().await;
    p.tables
        .transactions
        .faults()
        .set_latency(Some(OP_TIMEOUT + Duration::from_millis(200)))
        .await;

    send_sms(&p.tables, "sms-1", "Coffee Shop", "1").await;

    let report = p.feed.pump().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(p.dead_letters.recv().await.unwrap().attempts, 2);
}

// ============================================================================
// Category Correction
// ============================================================================

#[tokio::test]
async fn test_correction_applies_to_past_and_future_transactions() {
    let p = pipeline().await;
    send_sms(&p.tables, "sms-1", "Coffee Shop", "4.50").await;
    p.feed.pump().await.unwrap();

    let scoped = ScopedStores::new(
        "category-update",
        p.tables.stores(),
        grants::category_update(),
        OP_TIMEOUT,
    );
    let update = services::update_category(&scoped, "Coffee Shop", "Food")
        .await
        .unwrap();
    assert_eq!(update.updated, 1);

    send_sms(&p.tables, "sms-2", "Coffee Shop", "3.00").await;
    p.feed.pump().await.unwrap();

    for id in ["sms-1", "sms-2"] {
        let t = p
            .tables
            .transactions
            .get(&transaction_id_for(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.category.as_deref(), Some("Food"), "{}", id);
    }
}
