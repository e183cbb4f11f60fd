//! Supervised pool of tasks pushing builds onto the queue.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{SchedulerError, SchedulerResult};
use crate::lifecycle::{Enqueuer, QueueItem};

/// Drains submitted items on a fixed number of tokio tasks.
///
/// Submitting never waits on the queue broker. An item that cannot be
/// delivered still ends with its build in a terminal `error` state.
pub struct EnqueuePool {
    enqueuer: Arc<Enqueuer>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EnqueuePool {
    /// Start `workers` tasks. Must be called from within a tokio runtime.
    pub fn new(enqueuer: Arc<Enqueuer>, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<QueueItem>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let enqueuer = enqueuer.clone();
                tokio::spawn(async move { run(id, rx, enqueuer).await })
            })
            .collect();

        Self {
            enqueuer,
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Hand an item to the pool.
    ///
    /// After shutdown the build is cleaned immediately and an error returned.
    pub async fn submit(&self, item: QueueItem) -> SchedulerResult<()> {
        let rejected = match self.sender.lock().await.as_ref() {
            Some(tx) => match tx.send(item) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        self.enqueuer
            .abandon(&rejected, "enqueue pool is shut down")
            .await;
        Err(SchedulerError::Internal(format!(
            "unable to enqueue build {}: pool is shut down",
            rejected.build.id
        )))
    }

    /// Stop accepting items and wait for queued ones to drain.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Enqueue task ended abnormally");
            }
        }
        info!("Enqueue pool stopped");
    }
}

async fn run(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
    enqueuer: Arc<Enqueuer>,
) {
    info!(task = id, "Starting enqueue task");

    loop {
        let next = rx.lock().await.recv().await;
        let Some(item) = next else {
            break;
        };

        let build_id = item.build.id;
        // Keep the task alive if one item panics.
        if AssertUnwindSafe(enqueuer.enqueue(item))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(task = id, build_id = %build_id, "Enqueue panicked");
        }
    }
}
