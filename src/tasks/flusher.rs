//! Flusher Task
//!
//! Background task that periodically persists the cache index.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use crate::cache::WeakIndex;

/// Spawns the flusher loop, or returns None (with a warning) when the
/// interval is zero. Flush failures are logged and retried next cycle.
pub(crate) fn spawn_flusher(
    index: WeakIndex,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
    span: Span,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        warn!(parent: &span, "flush interval is zero; cache index flusher disabled");
        return None;
    }

    let task = async move {
        info!("starting cache index flusher with interval of {:?}", interval);

        loop {
            let Some(interval) = index.upgrade().map(|index| index.options().flush_interval)
            else {
                break;
            };
            if interval.is_zero() {
                warn!("flush interval changed to zero; cache index flusher stopping");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            let Some(index) = index.upgrade() else {
                break;
            };
            match index.flush().await {
                Ok(true) => debug!("cache index flushed"),
                Ok(false) => debug!("cache index unchanged; flush skipped"),
                Err(err) => warn!(error = %err, "cache index flush failed"),
            }
        }

        debug!("cache index flusher stopped");
    };

    Some(tokio::spawn(task.instrument(span)))
}
