use std::fmt;

use transfer_config::shared::TopicConfig;

/// Identifies a table buffer in the in-memory database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    pub schema: String,
    pub table: String,
}

impl TableId {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Destination database and schema a topic writes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseSchemaPair {
    pub database: String,
    pub schema: String,
}

impl From<&TopicConfig> for DatabaseSchemaPair {
    fn from(topic_config: &TopicConfig) -> Self {
        Self {
            database: topic_config.database.clone(),
            schema: topic_config.schema.clone(),
        }
    }
}

/// Fully qualified name of a table in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableIdentifier {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(TableId::new("public", "orders").to_string(), "public.orders");

        let pair = DatabaseSchemaPair::from(&TopicConfig::new("shop", "public", "orders"));
        assert_eq!(pair.database, "shop");
        assert_eq!(pair.schema, "public");

        let identifier = TableIdentifier {
            database: pair.database,
            schema: pair.schema,
            table: "orders".to_string(),
        };
        assert_eq!(identifier.to_string(), "shop.public.orders");
    }
}
