use std::collections::BTreeMap;
use std::time::Duration;

use transfer::buffer::FlushThresholds;
use transfer::error::ErrorKind;
use transfer::test_utils::event::{
    TEST_DATABASE, TEST_SCHEMA, orders_topic_config, push_create,
};
use transfer::test_utils::pipeline::TestPipeline;
use transfer::types::TableIdentifier;
use transfer_config::shared::Mode;
use transfer_telemetry::tracing::init_test_tracing;

fn identifier(table: &str) -> TableIdentifier {
    TableIdentifier {
        database: TEST_DATABASE.to_string(),
        schema: TEST_SCHEMA.to_string(),
        table: table.to_string(),
    }
}

fn thresholds(buffer_rows: usize) -> FlushThresholds {
    FlushThresholds {
        buffer_rows,
        ..FlushThresholds::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_threshold_triggers_immediate_flush() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders")],
        thresholds(5),
        Mode::Replication,
    );
    pipeline.start();

    let rows_written = pipeline.destination().wait_for_written_rows(5).await;
    for id in 1..=5 {
        push_create(pipeline.queue("orders"), "orders", id, "robin");
    }
    rows_written.reached().await;

    let queue = pipeline.queue("orders").clone();
    let destination = pipeline.memory_destination().clone();
    pipeline.shutdown().await.unwrap();

    let table = destination.table(&identifier("orders")).await.unwrap();
    assert_eq!(table.rows.len(), 5);
    assert_eq!(queue.committed_offsets(), BTreeMap::from([(0, 4)]));
    assert_eq!(queue.commits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn ticker_flushes_rows_below_thresholds() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders")],
        thresholds(100),
        Mode::Replication,
    );
    push_create(pipeline.queue("orders"), "orders", 1, "robin");
    push_create(pipeline.queue("orders"), "orders", 2, "jay");

    let rows_written = pipeline.destination().wait_for_written_rows(2).await;
    pipeline.start();
    pipeline.start_ticker(Duration::from_secs(10));
    rows_written.reached().await;

    assert_eq!(pipeline.destination().stats().await.merge_calls, 1);

    let queue = pipeline.queue("orders").clone();
    pipeline.shutdown().await.unwrap();
    assert_eq!(queue.committed_offsets(), BTreeMap::from([(0, 1)]));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_flushes_remaining_rows() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders")],
        thresholds(100),
        Mode::Replication,
    );
    for id in 1..=3 {
        push_create(pipeline.queue("orders"), "orders", id, "robin");
    }
    pipeline.queue("orders").close();
    pipeline.start();

    let queue = pipeline.queue("orders").clone();
    let destination = pipeline.memory_destination().clone();
    pipeline.shutdown().await.unwrap();

    let table = destination.table(&identifier("orders")).await.unwrap();
    assert_eq!(table.rows.len(), 3);
    assert_eq!(queue.committed_offsets(), BTreeMap::from([(0, 2)]));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merges_keep_offsets_uncommitted() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders")],
        thresholds(2),
        Mode::Replication,
    );
    // Every attempt of the immediate flush fails, the shutdown flush succeeds.
    pipeline.destination().fail_next_writes(3).await;
    push_create(pipeline.queue("orders"), "orders", 1, "robin");
    push_create(pipeline.queue("orders"), "orders", 2, "jay");
    pipeline.queue("orders").close();
    pipeline.start();

    let queue = pipeline.queue("orders").clone();
    let destination = pipeline.destination().clone();
    pipeline.shutdown().await.unwrap();

    let stats = destination.stats().await;
    assert_eq!(stats.failed_calls, 3);
    assert_eq!(stats.committed_merges, 1);
    assert_eq!(queue.commits().len(), 1);
    assert_eq!(queue.committed_offsets(), BTreeMap::from([(0, 1)]));

    let table = destination
        .wrapped()
        .table(&identifier("orders"))
        .await
        .unwrap();
    assert_eq!(table.rows.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn topics_are_flushed_and_committed_independently() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders"), orders_topic_config("payments")],
        thresholds(100),
        Mode::Replication,
    );
    for id in 1..=3 {
        push_create(pipeline.queue("orders"), "orders", id, "robin");
    }
    push_create(pipeline.queue("payments"), "payments", 10, "card");
    pipeline.queue("orders").close();
    pipeline.queue("payments").close();
    pipeline.start();

    let orders = pipeline.queue("orders").clone();
    let payments = pipeline.queue("payments").clone();
    let destination = pipeline.memory_destination().clone();
    pipeline.shutdown().await.unwrap();

    assert_eq!(orders.committed_offsets(), BTreeMap::from([(0, 2)]));
    assert_eq!(payments.committed_offsets(), BTreeMap::from([(0, 0)]));

    let tables = destination.tables().await;
    assert_eq!(tables[&identifier("orders")].rows.len(), 3);
    assert_eq!(tables[&identifier("payments")].rows.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn history_mode_appends_every_change() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders")],
        thresholds(100),
        Mode::History,
    );
    push_create(pipeline.queue("orders"), "orders", 1, "robin");
    push_create(pipeline.queue("orders"), "orders", 2, "jay");
    pipeline.queue("orders").close();
    pipeline.start();

    let destination = pipeline.destination().clone();
    pipeline.shutdown().await.unwrap();

    let stats = destination.stats().await;
    assert_eq!(stats.append_calls, 1);
    assert_eq!(stats.merge_calls, 0);

    let table = destination
        .wrapped()
        .table(&identifier("orders__history"))
        .await
        .unwrap();
    assert_eq!(table.appended.len(), 2);
    assert!(
        table
            .appended
            .iter()
            .all(|row| row["__artie_operation"] == "c")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_table_holds_back_offsets_of_shared_topic() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("shop")],
        thresholds(100),
        Mode::Replication,
    );
    // Every attempt of the shutdown flush fails for customers.
    pipeline
        .destination()
        .fail_next_writes_for("customers", 3)
        .await;
    push_create(pipeline.queue("shop"), "customers", 1, "robin");
    push_create(pipeline.queue("shop"), "orders", 1, "wren");
    pipeline.queue("shop").close();
    pipeline.start();

    let queue = pipeline.queue("shop").clone();
    let destination = pipeline.memory_destination().clone();
    let err = pipeline.shutdown().await.unwrap_err();

    assert!(err.kinds().contains(&ErrorKind::MergeFailed));
    assert_eq!(destination.table(&identifier("orders")).await.unwrap().rows.len(), 1);
    assert!(destination.table(&identifier("customers")).await.is_none());
    assert!(queue.commits().is_empty());
}
