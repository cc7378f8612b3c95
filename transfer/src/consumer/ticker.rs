use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::Destination;
use crate::flush::{FlushArgs, Flusher};
use crate::source::SourceQueue;

/// Sweeps every topic on a fixed interval until shutdown is signaled.
///
/// Tables flushed within the interval, for example by a row threshold, are skipped.
#[derive(Debug)]
pub struct FlushTicker<D, Q> {
    flusher: Flusher<D, Q>,
    interval: Duration,
    shutdown_rx: ShutdownRx,
}

impl<D, Q> FlushTicker<D, Q>
where
    D: Destination + Clone + Send + Sync + 'static,
    Q: SourceQueue + Send + Sync + 'static,
{
    pub fn new(flusher: Flusher<D, Q>, interval: Duration, shutdown_rx: ShutdownRx) -> Self {
        Self {
            flusher,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "starting flush ticker");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!("shutdown signal received, stopping flush ticker");
                    break;
                }
                _ = ticker.tick() => {
                    debug!("running timed flush");
                    if let Err(err) = self.flusher.flush(FlushArgs::sweep(self.interval)).await {
                        error!(error = %err, "timed flush failed");
                    }
                }
            }
        }
    }
}
