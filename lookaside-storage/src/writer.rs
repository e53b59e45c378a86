//! Background cache population.
//!
//! Read paths repopulate the cache after a store hit without waiting for it.
//! Those pipelines go through a bounded queue drained by one worker task, so
//! a slow or dead cache can never hold up a caller. When the queue is full
//! the job is dropped; the entry simply stays cold until the next miss.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::cache::{LookasideCache, Pipeline};
use crate::stats::AccessStats;

enum Job {
    Write {
        label: &'static str,
        pipeline: Pipeline,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the background cache writer.
#[derive(Clone)]
pub struct CacheWriter {
    sender: mpsc::Sender<Job>,
    stats: Arc<AccessStats>,
}

impl CacheWriter {
    /// Start the worker on the current Tokio runtime.
    ///
    /// Returns `None` outside a runtime; callers then write inline.
    pub fn spawn(
        cache: Arc<dyn LookasideCache>,
        capacity: usize,
        stats: Arc<AccessStats>,
    ) -> Option<Self> {
        let handle = Handle::try_current().ok()?;
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        handle.spawn(run(cache, receiver, Arc::clone(&stats)));
        Some(Self { sender, stats })
    }

    /// Queue `pipeline` without waiting. Drops it if the queue is full.
    pub fn submit(&self, label: &'static str, pipeline: Pipeline) {
        if pipeline.is_empty() {
            return;
        }
        match self.sender.try_send(Job::Write { label, pipeline }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_dropped_write();
                tracing::warn!(operation = label, "Cache write queue full, dropping write");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_dropped_write();
                tracing::warn!(operation = label, "Cache writer stopped, dropping write");
            }
        }
    }

    /// Wait until every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Job::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}

impl std::fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter")
            .field("capacity", &self.sender.max_capacity())
            .finish_non_exhaustive()
    }
}

async fn run(
    cache: Arc<dyn LookasideCache>,
    mut receiver: mpsc::Receiver<Job>,
    stats: Arc<AccessStats>,
) {
    while let Some(job) = receiver.recv().await {
        match job {
            Job::Write { label, pipeline } => {
                if !cache.is_connected() {
                    tracing::debug!(operation = label, "Cache disconnected, skipping write");
                    continue;
                }
                let commands = pipeline.len();
                if let Err(e) = cache.execute(pipeline).await {
                    stats.record_cache_error();
                    tracing::warn!(operation = label, commands, error = %e, "Background cache write failed");
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::trace!("Cache writer stopped");
}
