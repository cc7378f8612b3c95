use serde_json::json;
use transfer::buffer::FlushThresholds;
use transfer::constants::TOAST_UNAVAILABLE_VALUE_PLACEHOLDER;
use transfer::test_utils::event::{TEST_DATABASE, TEST_SCHEMA, orders_topic_config, push_update};
use transfer::test_utils::pipeline::TestPipeline;
use transfer::types::{KindDetails, TableIdentifier};
use transfer_config::shared::Mode;
use transfer_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn toasted_values_keep_the_stored_value() {
    init_test_tracing();

    let mut pipeline = TestPipeline::new(
        vec![orders_topic_config("orders")],
        FlushThresholds {
            buffer_rows: 1,
            ..FlushThresholds::default()
        },
        Mode::Replication,
    );
    pipeline.start();

    let first_flush = pipeline.destination().wait_for_written_rows(1).await;
    push_update(
        pipeline.queue("orders"),
        "orders",
        1,
        json!({ "id": 1, "name": "robin", "notes": "a very long text" }),
    );
    first_flush.reached().await;

    push_update(
        pipeline.queue("orders"),
        "orders",
        1,
        json!({ "id": 1, "name": "wren", "notes": TOAST_UNAVAILABLE_VALUE_PLACEHOLDER }),
    );
    pipeline.queue("orders").close();

    let destination = pipeline.memory_destination().clone();
    pipeline.shutdown().await.unwrap();

    let table = destination
        .table(&TableIdentifier {
            database: TEST_DATABASE.to_string(),
            schema: TEST_SCHEMA.to_string(),
            table: "orders".to_string(),
        })
        .await
        .unwrap();

    let row = &table.rows["id=1"];
    assert_eq!(row["name"], json!("wren"));
    assert_eq!(row["notes"], json!("a very long text"));
    assert_eq!(
        table.columns.get_column("notes").map(|c| c.kind_details()),
        Some(KindDetails::String)
    );
}
