use serde_json::json;
use transfer::buffer::FlushThresholds;
use transfer::test_utils::event::{
    TEST_DATABASE, TEST_SCHEMA, orders_topic_config, push_create, push_delete, push_update,
};
use transfer::test_utils::pipeline::TestPipeline;
use transfer::types::TableIdentifier;
use transfer_config::shared::{Mode, TopicConfig};
use transfer_telemetry::tracing::init_test_tracing;

fn orders() -> TableIdentifier {
    TableIdentifier {
        database: TEST_DATABASE.to_string(),
        schema: TEST_SCHEMA.to_string(),
        table: "orders".to_string(),
    }
}

/// Creates two orders and flushes them, then updates the first and deletes the second.
async fn run_create_update_delete(topic_config: TopicConfig) -> TestPipeline {
    let mut pipeline = TestPipeline::new(
        vec![topic_config],
        FlushThresholds {
            buffer_rows: 2,
            ..FlushThresholds::default()
        },
        Mode::Replication,
    );
    pipeline.start();

    let first_flush = pipeline.destination().wait_for_written_rows(2).await;
    push_create(pipeline.queue("orders"), "orders", 1, "robin");
    push_create(pipeline.queue("orders"), "orders", 2, "jay");
    first_flush.reached().await;

    push_update(
        pipeline.queue("orders"),
        "orders",
        1,
        json!({ "id": 1, "name": "wren" }),
    );
    push_delete(pipeline.queue("orders"), "orders", 2);
    pipeline.queue("orders").close();

    pipeline
}

#[tokio::test(flavor = "multi_thread")]
async fn hard_deletes_remove_rows() {
    init_test_tracing();

    let pipeline = run_create_update_delete(orders_topic_config("orders")).await;
    let destination = pipeline.memory_destination().clone();
    let queue = pipeline.queue("orders").clone();
    pipeline.shutdown().await.unwrap();

    let table = destination.table(&orders()).await.unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows["id=1"]["name"], json!("wren"));
    assert_eq!(queue.committed_offsets()[&0], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn soft_deletes_flag_rows() {
    init_test_tracing();

    let mut topic_config = orders_topic_config("orders");
    topic_config.soft_delete = true;

    let pipeline = run_create_update_delete(topic_config).await;
    let destination = pipeline.memory_destination().clone();
    pipeline.shutdown().await.unwrap();

    let table = destination.table(&orders()).await.unwrap();
    assert_eq!(table.rows.len(), 2);

    let deleted = &table.rows["id=2"];
    assert_eq!(deleted["__artie_delete"], json!(true));
    assert_eq!(deleted["name"], json!("jay"));
    assert_eq!(table.rows["id=1"]["__artie_delete"], json!(false));
}
