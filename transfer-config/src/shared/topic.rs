use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Envelope format of the change events on a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdcFormat {
    /// Debezium JSON envelope, with or without the embedded schema.
    #[default]
    #[serde(rename = "debezium.json", alias = "debezium.postgres", alias = "debezium.mysql")]
    DebeziumJson,
}

/// Encoding of the message key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    /// `org.apache.kafka.connect.json.JsonConverter`.
    #[default]
    Json,
    /// `org.apache.kafka.connect.storage.StringConverter`, e.g. `Struct{id=1}`.
    String,
}

/// A column with a constant value added to every row of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticColumn {
    pub name: String,
    pub value: String,
}

/// Per-topic settings: where rows land and how columns are filtered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Destination database.
    pub database: String,
    /// Destination schema.
    pub schema: String,
    /// Source topic name.
    pub topic: String,
    /// Overrides the table name reported by the change event.
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub cdc_format: CdcFormat,
    #[serde(default)]
    pub cdc_key_format: KeyFormat,
    /// Deletes are written as `__artie_delete = true` rows instead of removing them.
    #[serde(default)]
    pub soft_delete: bool,
    /// Adds `__artie_updated_at` with the ingestion time.
    #[serde(default)]
    pub include_artie_updated_at: bool,
    /// Adds `__artie_db_updated_at` with the source commit time.
    #[serde(default)]
    pub include_database_updated_at: bool,
    /// Adds `__artie_operation` with the change operation.
    #[serde(default)]
    pub include_artie_operation: bool,
    /// Replaces the primary keys carried by the message key.
    #[serde(default)]
    pub primary_keys_override: Vec<String>,
    /// Extra columns treated as primary keys in addition to the message key.
    #[serde(default)]
    pub include_primary_keys: Vec<String>,
    #[serde(default)]
    pub columns_to_include: Vec<String>,
    #[serde(default)]
    pub columns_to_exclude: Vec<String>,
    /// Columns whose values are replaced with their SHA-256 digest.
    #[serde(default)]
    pub columns_to_hash: Vec<String>,
    #[serde(default)]
    pub static_columns: Vec<StaticColumn>,
}

impl TopicConfig {
    /// Creates a topic config with every optional setting left at its default.
    pub fn new(database: &str, schema: &str, topic: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
            topic: topic.to_string(),
            table_name: None,
            cdc_format: CdcFormat::default(),
            cdc_key_format: KeyFormat::default(),
            soft_delete: false,
            include_artie_updated_at: false,
            include_database_updated_at: false,
            include_artie_operation: false,
            primary_keys_override: vec![],
            include_primary_keys: vec![],
            columns_to_include: vec![],
            columns_to_exclude: vec![],
            columns_to_hash: vec![],
            static_columns: vec![],
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("topic", &self.topic),
            ("database", &self.database),
            ("schema", &self.schema),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("topic_configs.{field}"),
                    constraint: "must not be empty".to_string(),
                });
            }
        }

        if !self.columns_to_include.is_empty() && !self.columns_to_exclude.is_empty() {
            return Err(ValidationError::ConflictingColumnFilters {
                topic: self.topic.clone(),
            });
        }

        let mut static_names = HashSet::new();
        for static_column in &self.static_columns {
            if static_column.name.trim().is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "topic_configs.static_columns.name".to_string(),
                    constraint: "must not be empty".to_string(),
                });
            }

            if !static_names.insert(static_column.name.as_str()) {
                return Err(ValidationError::DuplicateStaticColumn {
                    topic: self.topic.clone(),
                    column: static_column.name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: TopicConfig = serde_json::from_str(
            r#"{"database": "shop", "schema": "public", "topic": "dbserver1.public.orders", "cdc_format": "debezium.postgres", "cdc_key_format": "string"}"#,
        )
        .unwrap();

        assert_eq!(config.cdc_format, CdcFormat::DebeziumJson);
        assert_eq!(config.cdc_key_format, KeyFormat::String);
        assert!(config.columns_to_hash.is_empty());
        assert!(!config.soft_delete);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn include_and_exclude_are_mutually_exclusive() {
        let mut config = TopicConfig::new("db", "public", "orders");
        config.columns_to_include = vec!["id".to_string()];
        config.columns_to_exclude = vec!["name".to_string()];

        assert_eq!(
            config.validate(),
            Err(ValidationError::ConflictingColumnFilters {
                topic: "orders".to_string()
            })
        );
    }

    #[test]
    fn static_columns_must_be_unique() {
        let mut config = TopicConfig::new("db", "public", "orders");
        config.static_columns = vec![
            StaticColumn {
                name: "region".to_string(),
                value: "eu".to_string(),
            },
            StaticColumn {
                name: "region".to_string(),
                value: "us".to_string(),
            },
        ];

        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateStaticColumn { .. })
        ));
    }

    #[test]
    fn empty_topic_is_rejected() {
        let config = TopicConfig::new("db", "public", " ");
        assert!(config.validate().is_err());
    }
}
