//! Index Worker Task
//!
//! Drains the index's background queue: bulk removals from the backend and
//! access-time updates after reads. Nothing in the foreground waits on it.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

use crate::cache::WeakIndex;

/// Work queued by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IndexTask {
    /// Delete keys from the backend; the index already dropped them
    Remove(Vec<String>),
    /// Record a read of the key
    Touch(String),
}

pub(crate) fn spawn_worker(
    index: WeakIndex,
    mut queue: mpsc::UnboundedReceiver<IndexTask>,
    mut shutdown: watch::Receiver<bool>,
    span: Span,
) -> JoinHandle<()> {
    let task = async move {
        loop {
            let task = tokio::select! {
                task = queue.recv() => task,
                _ = shutdown.changed() => None,
            };
            let (Some(task), Some(index)) = (task, index.upgrade()) else {
                break;
            };

            match task {
                IndexTask::Remove(keys) => {
                    let count = keys.len();
                    match index.remove_stale(keys).await {
                        Ok(removed) => debug!(queued = count, removed, "background removal done"),
                        Err(err) => warn!(keys = count, error = %err, "background removal failed"),
                    }
                }
                IndexTask::Touch(key) => index.update_object_access_time(&key),
            }
        }

        debug!("cache index worker stopped");
    };

    tokio::spawn(task.instrument(span))
}
