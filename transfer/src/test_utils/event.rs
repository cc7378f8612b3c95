use serde_json::{Value, json};
use transfer_config::shared::TopicConfig;

use crate::format::{CdcEvent, Operation};
use crate::source::{AckMode, Message};
use crate::source::memory::MemoryQueue;
use crate::types::RowData;

/// Source timestamp used by the builders, 2023-11-14T22:13:20Z.
pub const TEST_SOURCE_TS_MS: i64 = 1_700_000_000_000;

/// Database of the topics built by [`orders_topic_config`].
pub const TEST_DATABASE: &str = "shop";
/// Schema of the topics built by [`orders_topic_config`].
pub const TEST_SCHEMA: &str = "public";

/// Returns a topic config for `topic` with JSON keys and default options.
pub fn orders_topic_config(topic: &str) -> TopicConfig {
    TopicConfig::new(TEST_DATABASE, TEST_SCHEMA, topic)
}

/// Builds a row from `(column, value)` pairs.
pub fn row<I, K>(values: I) -> RowData
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    values
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

/// Builds a Debezium JSON key carrying a single `id` column.
pub fn json_key(id: i64) -> Vec<u8> {
    json!({ "payload": { "id": id } }).to_string().into_bytes()
}

/// Builds a schemaless Debezium value for `table`.
///
/// `after` is `None` for deletes.
pub fn debezium_value(table: &str, op: Operation, after: Option<Value>, ts_ms: i64) -> Vec<u8> {
    json!({
        "before": null,
        "after": after,
        "source": { "ts_ms": ts_ms, "table": table },
        "op": op.as_str(),
    })
    .to_string()
    .into_bytes()
}

/// Pushes a create event for `{id, name}` into `queue` on partition 0.
pub fn push_create(queue: &MemoryQueue, table: &str, id: i64, name: &str) -> Message {
    let after = json!({ "id": id, "name": name });
    queue.push(
        0,
        Some(json_key(id)),
        Some(debezium_value(
            table,
            Operation::Create,
            Some(after),
            TEST_SOURCE_TS_MS,
        )),
    )
}

/// Pushes an update event with an arbitrary row image into `queue` on partition 0.
pub fn push_update(queue: &MemoryQueue, table: &str, id: i64, after: Value) -> Message {
    queue.push(
        0,
        Some(json_key(id)),
        Some(debezium_value(
            table,
            Operation::Update,
            Some(after),
            TEST_SOURCE_TS_MS,
        )),
    )
}

/// Pushes a delete event for `id` into `queue` on partition 0.
pub fn push_delete(queue: &MemoryQueue, table: &str, id: i64) -> Message {
    queue.push(
        0,
        Some(json_key(id)),
        Some(debezium_value(
            table,
            Operation::Delete,
            None,
            TEST_SOURCE_TS_MS,
        )),
    )
}

/// Builds a decoded change event without going through a format adapter.
pub fn cdc_event(table: &str, operation: Operation, after: Option<RowData>) -> CdcEvent {
    CdcEvent {
        table_name: table.to_string(),
        operation,
        execution_time: chrono::DateTime::from_timestamp_millis(TEST_SOURCE_TS_MS)
            .unwrap_or_default(),
        after,
        optional_schema: None,
        columns: None,
    }
}

/// Wraps raw key and value bytes in a message of `topic`.
pub fn message(topic: &str, offset: i64, key: Vec<u8>, value: Vec<u8>) -> Message {
    Message {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: Some(key),
        value: Some(value),
        high_water_mark: offset + 1,
        published_at: None,
        ack_mode: AckMode::LatestPerPartition,
    }
}
