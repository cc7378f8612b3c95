use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// No topic is configured for the source.
    #[error("at least one topic config must be provided")]
    MissingTopicConfigs,
    /// The same topic is configured twice.
    #[error("topic `{0}` is configured more than once")]
    DuplicateTopic(String),
    /// Both an include and an exclude list were configured for a topic.
    #[error("topic `{topic}` cannot set both `columns_to_include` and `columns_to_exclude`")]
    ConflictingColumnFilters { topic: String },
    /// A static column is declared more than once for a topic.
    #[error("topic `{topic}` declares static column `{column}` more than once")]
    DuplicateStaticColumn { topic: String, column: String },
}
