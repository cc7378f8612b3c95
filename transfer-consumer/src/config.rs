use transfer_config::load_config;
use transfer_config::shared::TransferConfig;

use crate::error::{ConsumerError, ConsumerResult};

/// Loads and validates the consumer configuration.
pub fn load_transfer_config() -> ConsumerResult<TransferConfig> {
    let config = load_config::<TransferConfig>().map_err(ConsumerError::config)?;
    config.validate().map_err(ConsumerError::config)?;

    Ok(config)
}
