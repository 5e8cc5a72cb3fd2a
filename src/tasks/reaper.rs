//! Reaper Task
//!
//! Background task that periodically reaps the cache index.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use crate::cache::WeakIndex;

/// Spawns the reaper loop, or returns None (with a warning) when the
/// interval is zero.
///
/// The loop sleeps for the current reap interval between passes and exits
/// when the shutdown signal fires or the index is dropped.
pub(crate) fn spawn_reaper(
    index: WeakIndex,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
    span: Span,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        warn!(parent: &span, "reap interval is zero; cache reaper disabled");
        return None;
    }

    let task = async move {
        info!("starting cache reaper with interval of {:?}", interval);

        loop {
            let Some(interval) = index.upgrade().map(|index| index.options().reap_interval) else {
                break;
            };
            if interval.is_zero() {
                warn!("reap interval changed to zero; cache reaper stopping");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            match index.upgrade() {
                Some(index) => index.reap(),
                None => break,
            }
        }

        debug!("cache reaper stopped");
    };

    Some(tokio::spawn(task.instrument(span)))
}
