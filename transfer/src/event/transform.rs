use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use transfer_config::shared::TopicConfig;

use crate::constants::{
    ARTIE_COLUMNS, DATABASE_UPDATED_COLUMN_MARKER, DELETE_COLUMN_MARKER, UPDATE_COLUMN_MARKER,
};
use crate::format::CdcEvent;
use crate::types::{Column, Columns, KindDetails, RowData, escape_name, value_to_string};

/// Replaces a value with the hex SHA-256 digest of its string form. Nulls pass through.
pub(crate) fn hash_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        other => {
            let digest = Sha256::digest(value_to_string(other).as_bytes());
            Value::String(format!("{digest:x}"))
        }
    }
}

/// Builds the row image of `cdc_event` with the system columns requested by `topic_config`.
///
/// Deletes carry no row image, so the row is rebuilt from the primary key.
pub(crate) fn build_data(
    cdc_event: &mut CdcEvent,
    primary_key_map: &RowData,
    topic_config: &TopicConfig,
) -> RowData {
    let deleted = cdc_event.is_delete();

    let mut data = if deleted {
        primary_key_map.clone()
    } else {
        cdc_event.after.take().unwrap_or_default()
    };
    data.insert(DELETE_COLUMN_MARKER.to_string(), Value::Bool(deleted));

    if topic_config.include_artie_updated_at {
        data.insert(
            UPDATE_COLUMN_MARKER.to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
    }

    if topic_config.include_database_updated_at {
        data.insert(
            DATABASE_UPDATED_COLUMN_MARKER.to_string(),
            Value::String(
                cdc_event
                    .execution_time
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
        );
    }

    data
}

/// Applies the hash, exclude and include lists of `topic_config` to `data`.
///
/// An include-list always keeps the system columns and the static columns.
pub(crate) fn transform_data(mut data: RowData, topic_config: &TopicConfig) -> RowData {
    for column in &topic_config.columns_to_hash {
        if let Some(value) = data.get_mut(column) {
            *value = hash_value(value);
        }
    }

    for column in &topic_config.columns_to_exclude {
        data.remove(column);
    }

    if topic_config.columns_to_include.is_empty() {
        return data;
    }

    let mut filtered = RowData::with_capacity(topic_config.columns_to_include.len());
    let kept = topic_config
        .columns_to_include
        .iter()
        .map(String::as_str)
        .chain(ARTIE_COLUMNS)
        .chain(
            topic_config
                .static_columns
                .iter()
                .map(|column| column.name.as_str()),
        );
    for column in kept {
        if let Some(value) = data.remove(column) {
            filtered.insert(column.to_string(), value);
        }
    }

    filtered
}

/// Applies the exclude and include lists to the columns declared by the event, and adds the
/// static columns as strings.
pub(crate) fn build_filtered_columns(
    columns: Option<Columns>,
    topic_config: &TopicConfig,
) -> Option<Columns> {
    if columns.is_none() && topic_config.static_columns.is_empty() {
        return None;
    }

    let mut columns = columns.unwrap_or_default();
    for column in &topic_config.columns_to_exclude {
        columns.delete_column(column);
    }

    if !topic_config.columns_to_include.is_empty() {
        let mut filtered = Columns::default();
        for name in topic_config
            .columns_to_include
            .iter()
            .map(String::as_str)
            .chain(ARTIE_COLUMNS)
        {
            if let Some(column) = columns.get_column(name) {
                filtered.add_column(column.clone());
            }
        }
        columns = filtered;
    }

    for static_column in &topic_config.static_columns {
        columns.add_column(Column::new(&static_column.name, KindDetails::String));
    }

    Some(columns)
}

/// Returns the primary key column names for an event, unsorted.
///
/// `primary_key_map` is already escaped. An override replaces it, and included keys are
/// appended when missing.
pub(crate) fn build_primary_keys(
    topic_config: &TopicConfig,
    primary_key_map: &RowData,
) -> Vec<String> {
    if !topic_config.primary_keys_override.is_empty() {
        return topic_config
            .primary_keys_override
            .iter()
            .map(|key| escape_name(key))
            .collect();
    }

    let mut primary_keys: Vec<String> = primary_key_map.keys().cloned().collect();
    for key in &topic_config.include_primary_keys {
        let escaped = escape_name(key);
        if !primary_key_map.contains_key(&escaped) && !primary_keys.contains(&escaped) {
            primary_keys.push(escaped);
        }
    }

    primary_keys
}
