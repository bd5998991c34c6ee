//! Server-side batching and commit engine.
//!
//! Producers hand measurements to a bounded queue. A single consumer task
//! owns the current [`Batch`], turns each measurement into a [`Point`] and
//! commits the batch downstream when it is full or when the batch window
//! elapses. Failed commits are retried at a fixed interval; once retries are
//! exhausted the collector terminates and reports the error to every caller
//! of [`Collector::wait`].

pub mod batch;
pub mod writer;

pub use batch::{Batch, Point, SHADOW_PREFIX};
pub use writer::{FnWriter, JsonLinesWriter, LogWriter, MemoryWriter, Writer};

use crate::core::retry::retry_fixed;
use crate::core::{CollectorConfig, Measurement, Result, TallyError};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

/// Stand-in deadline when no batch window is configured. The timer branch is
/// disabled in that case, this only keeps the sleep future valid.
const IDLE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

type Termination = Option<Arc<TallyError>>;

/// Running counters of a collector.
#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    committed_points: AtomicU64,
    commits: AtomicU64,
    failed_attempts: AtomicU64,
}

/// A point-in-time copy of collector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    /// Measurements accepted into the queue
    pub received: u64,
    /// Points successfully written downstream
    pub committed_points: u64,
    /// Successful commits
    pub commits: u64,
    /// Commit attempts that failed
    pub failed_attempts: u64,
}

/// Handle to a running collector.
///
/// Cheap to clone. When every handle is dropped the consumer commits what it
/// holds and exits.
#[derive(Clone)]
pub struct Collector {
    sender: mpsc::Sender<Measurement>,
    terminated: watch::Receiver<Termination>,
    counters: Arc<Counters>,
}

impl Collector {
    /// Spawn the consumer task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: CollectorConfig, writer: Arc<dyn Writer>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity());
        let (done, terminated) = watch::channel(None);
        let counters = Arc::new(Counters::default());

        tracing::info!(
            batch_size = config.batch_size,
            queue_capacity = config.queue_capacity(),
            max_batch_window = ?config.max_batch_window,
            max_retries = config.max_retries,
            "Starting collector"
        );

        let consumer = Consumer {
            batch: Batch::with_capacity(config.batch_size),
            config,
            writer,
            receiver,
            counters: counters.clone(),
        };
        tokio::spawn(consumer.run(done));

        Self {
            sender,
            terminated,
            counters,
        }
    }

    /// Enqueue a measurement for batching.
    ///
    /// Waits while the queue is full. Fails with
    /// [`TallyError::CollectorTerminated`] once the collector has stopped,
    /// including for callers already waiting on a full queue.
    pub async fn submit(&self, measurement: Measurement) -> Result<()> {
        self.sender
            .send(measurement)
            .await
            .map_err(|_| TallyError::CollectorTerminated)?;
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait for the collector to terminate and return the error that caused it.
    ///
    /// Returns `None` if `timeout` elapses first. A `None` timeout waits
    /// indefinitely.
    pub async fn wait(&self, timeout: Option<Duration>) -> Option<Arc<TallyError>> {
        let mut terminated = self.terminated.clone();
        let settled = async move {
            match terminated.wait_for(Option::is_some).await {
                Ok(error) => (*error).clone(),
                Err(_) => None,
            }
        };

        match timeout {
            None => settled.await,
            Some(timeout) => tokio::time::timeout(timeout, settled).await.ok().flatten(),
        }
    }

    /// Whether the collector has permanently stopped.
    pub fn is_terminated(&self) -> bool {
        self.terminated.borrow().is_some()
    }

    /// Snapshot of the collector's counters.
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            received: self.counters.received.load(Ordering::Relaxed),
            committed_points: self.counters.committed_points.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed_attempts.load(Ordering::Relaxed),
        }
    }
}

/// When a window starting now ends. Windows past the clock's range end in
/// roughly thirty years.
fn deadline(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

/// State owned exclusively by the consumer task.
struct Consumer {
    config: CollectorConfig,
    writer: Arc<dyn Writer>,
    receiver: mpsc::Receiver<Measurement>,
    batch: Batch,
    counters: Arc<Counters>,
}

impl Consumer {
    async fn run(mut self, done: watch::Sender<Termination>) {
        let window = self.config.max_batch_window;
        let timer = sleep_until(deadline(window.unwrap_or(IDLE_WINDOW)));
        tokio::pin!(timer);

        loop {
            let outcome = tokio::select! {
                next = self.receiver.recv() => match next {
                    Some(measurement) => {
                        self.accumulate(measurement);
                        if self.batch.len() < self.config.batch_size {
                            continue;
                        }
                        self.commit().await
                    },
                    None => {
                        tracing::info!("All collector handles dropped, committing final batch");
                        if let Err(e) = self.commit().await {
                            tracing::error!("Final commit failed: {}", e);
                            done.send_replace(Some(Arc::new(e)));
                        }
                        return;
                    },
                },
                () = &mut timer, if window.is_some() => self.commit().await,
            };

            if let Err(e) = outcome {
                tracing::error!("Collector terminating: {}", e);
                self.receiver.close();
                done.send_replace(Some(Arc::new(e)));
                return;
            }

            timer.as_mut().reset(deadline(window.unwrap_or(IDLE_WINDOW)));
        }
    }

    fn accumulate(&mut self, measurement: Measurement) {
        let point =
            Point::from_measurement(measurement, &self.config.indexed_dimensions, Utc::now());
        self.batch.push(point);
    }

    async fn commit(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            tracing::trace!("Nothing to commit");
            return Ok(());
        }

        let writer = &self.writer;
        let batch = &self.batch;
        let counters = &self.counters;
        retry_fixed(self.config.retry_policy(), || async move {
            let result = writer.write(batch).await;
            if result.is_err() {
                counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
            }
            result
        })
        .await?;

        let size = self.batch.len() as u64;
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        self.counters.committed_points.fetch_add(size, Ordering::Relaxed);
        tracing::debug!(batch_size = size, "Committed batch");

        self.batch = Batch::with_capacity(self.config.batch_size);
        Ok(())
    }
}
