use std::collections::HashSet;

use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::{TopicConfig, ValidationError};

/// Configuration of the queue the consumer reads change events from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// Kafka consumer group.
    Kafka(KafkaConfig),
    /// In-process queue fed by the embedding application, used for tests and demos.
    Memory { topic_configs: Vec<TopicConfig> },
}

impl SourceConfig {
    /// Returns the topic configurations of this source.
    pub fn topic_configs(&self) -> &[TopicConfig] {
        match self {
            SourceConfig::Kafka(kafka) => &kafka.topic_configs,
            SourceConfig::Memory { topic_configs } => topic_configs,
        }
    }

    /// Validates the source and all of its topics.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let SourceConfig::Kafka(kafka) = self {
            kafka.validate()?;
        }

        let topic_configs = self.topic_configs();
        if topic_configs.is_empty() {
            return Err(ValidationError::MissingTopicConfigs);
        }

        let mut seen = HashSet::new();
        for topic_config in topic_configs {
            topic_config.validate()?;
            if !seen.insert(topic_config.topic.as_str()) {
                return Err(ValidationError::DuplicateTopic(topic_config.topic.clone()));
            }
        }

        Ok(())
    }
}

/// Kafka connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses, `host:port`.
    pub bootstrap_servers: Vec<String>,
    /// Consumer group used for offset commits.
    pub group_id: String,
    /// SASL/PLAIN username. Enables SASL_SSL when set.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// One entry per consumed topic.
    pub topic_configs: Vec<TopicConfig>,
}

impl KafkaConfig {
    /// Returns the broker list in the comma-separated form Kafka clients expect.
    pub fn bootstrap_servers(&self) -> String {
        self.bootstrap_servers.join(",")
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.bootstrap_servers.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.kafka.bootstrap_servers".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.group_id.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.kafka.group_id".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_topics_are_rejected() {
        let source = SourceConfig::Memory {
            topic_configs: vec![
                TopicConfig::new("db", "public", "orders"),
                TopicConfig::new("db", "public", "orders"),
            ],
        };

        assert_eq!(
            source.validate(),
            Err(ValidationError::DuplicateTopic("orders".to_string()))
        );
    }

    #[test]
    fn empty_topics_are_rejected() {
        let source = SourceConfig::Memory {
            topic_configs: vec![],
        };

        assert_eq!(source.validate(), Err(ValidationError::MissingTopicConfigs));
    }

    #[test]
    fn kafka_requires_brokers_and_group() {
        let kafka = KafkaConfig {
            bootstrap_servers: vec![],
            group_id: "group".to_string(),
            username: None,
            password: None,
            topic_configs: vec![TopicConfig::new("db", "public", "orders")],
        };
        assert!(SourceConfig::Kafka(kafka.clone()).validate().is_err());

        let kafka = KafkaConfig {
            bootstrap_servers: vec!["localhost:9092".to_string(), "localhost:9093".to_string()],
            ..kafka
        };
        assert_eq!(kafka.bootstrap_servers(), "localhost:9092,localhost:9093");
        assert!(SourceConfig::Kafka(kafka).validate().is_ok());
    }
}
