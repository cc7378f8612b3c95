//! Transfer consumer binary.
//!
//! Loads the configuration, initializes logging and runs one reader per configured topic
//! until the sources close or a shutdown signal arrives.

use std::process::ExitCode;

use transfer_config::Environment;
use transfer_config::shared::TransferConfig;
use transfer_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_transfer_config;
use crate::core::start_consumer_with_config;
use crate::error::{ConsumerError, ConsumerResult};

mod config;
mod core;
mod error;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> ConsumerResult<()> {
    let environment = Environment::load()?;
    let transfer_config = load_transfer_config()?;

    // Production logs are rendered as JSON.
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"), environment.is_prod())
        .map_err(ConsumerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(transfer_config))
}

async fn async_main(transfer_config: TransferConfig) -> ConsumerResult<()> {
    if let Err(err) = start_consumer_with_config(transfer_config).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
