//! Single-flight FIFO work queues
//!
//! [`SerialQueue`] serializes async units of work: one worker task dequeues
//! units in submission order and awaits each to completion before starting
//! the next. The engine runs two instances, one at operation grain (single
//! GATT calls) and one at transfer grain (whole file transfers), so a
//! transfer can hold its queue slot while issuing per-packet operation units.
//!
//! [`SerialQueue::clear`] abandons everything still waiting: queued units are
//! dropped unrun and their submitters observe [`FtpError::Cancelled`].

use crate::error::{FtpError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

type Job = BoxFuture<'static, ()>;

/// Strict FIFO executor running one unit at a time
pub struct SerialQueue {
    label: &'static str,
    tx: mpsc::UnboundedSender<(u64, Job)>,
    generation: Arc<AtomicU64>,
}

impl SerialQueue {
    /// Create a queue and spawn its worker task
    ///
    /// The worker runs until the queue is dropped.
    pub fn new(label: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, Job)>();
        let generation = Arc::new(AtomicU64::new(0));

        let current = Arc::clone(&generation);
        tokio::spawn(async move {
            while let Some((submitted, job)) = rx.recv().await {
                if submitted != current.load(Ordering::Acquire) {
                    // Dropping the job wakes its submitter with a closed
                    // completion channel.
                    trace!("dropping stale queue unit");
                    continue;
                }
                job.await;
            }
        });

        Self {
            label,
            tx,
            generation,
        }
    }

    /// Enqueue a unit; the receiver resolves with its output
    ///
    /// If the unit is abandoned by [`SerialQueue::clear`], the receiver
    /// completes with an error instead.
    pub fn submit<F, T>(&self, unit: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let output = unit.await;
            // Submitter may have stopped waiting.
            let _ = done_tx.send(output);
        });

        let submitted = self.generation.load(Ordering::Acquire);
        if self.tx.send((submitted, job)).is_err() {
            debug!("{} queue worker gone, unit rejected", self.label);
        }
        done_rx
    }

    /// Enqueue a unit and await its output
    pub async fn run<F, T>(&self, unit: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(unit).await.map_err(|_| FtpError::Cancelled)
    }

    /// Abandon every unit not yet started
    ///
    /// A unit already executing runs to completion; everything behind it is
    /// dropped unrun.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!("{} queue cleared", self.label);
    }
}
