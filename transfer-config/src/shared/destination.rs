use serde::Deserialize;

/// Destination the buffered rows are flushed to.
///
/// The set of variants is closed; the consumer resolves the concrete
/// destination once at startup by matching on this enum.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// Keeps merged tables in process memory.
    #[default]
    Memory,
}

impl DestinationConfig {
    pub fn name(&self) -> &'static str {
        match self {
            DestinationConfig::Memory => "memory",
        }
    }
}
