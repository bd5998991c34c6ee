//! Downstream writers that receive committed batches.
//!
//! - `LogWriter`: logs each point via `tracing`.
//! - `JsonLinesWriter`: appends points as JSON lines to a file.
//! - `MemoryWriter`: keeps batches in memory for tests and embedding.
//! - `FnWriter`: adapts a closure.

use crate::collector::batch::{Batch, Point};
use crate::core::{Result, TallyError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Writes a batch to the downstream store.
///
/// Called once per commit attempt. A batch may be written again after a
/// failure, so implementations must tolerate duplicate delivery.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Persist every point of `batch`.
    async fn write(&self, batch: &Batch) -> Result<()>;
}

/// Logs points instead of storing them.
pub struct LogWriter;

#[async_trait]
impl Writer for LogWriter {
    async fn write(&self, batch: &Batch) -> Result<()> {
        for point in batch.points() {
            tracing::info!(
                name = %point.name,
                ts = %point.ts,
                tags = ?point.tags,
                fields = ?point.fields,
                "point"
            );
        }
        Ok(())
    }
}

/// Appends points to a JSON-lines file.
pub struct JsonLinesWriter {
    path: PathBuf,
}

impl JsonLinesWriter {
    /// Create a writer appending to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Return the output path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Writer for JsonLinesWriter {
    async fn write(&self, batch: &Batch) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut buf = Vec::with_capacity(batch.len() * 128);
        for point in batch.points() {
            serde_json::to_writer(&mut buf, point)?;
            buf.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                TallyError::write(format!("failed to open {}: {}", self.path.display(), e))
            })?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps committed batches in memory.
#[derive(Default)]
pub struct MemoryWriter {
    batches: Mutex<Vec<Batch>>,
}

impl MemoryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all stored batches, leaving the writer empty.
    pub fn take_batches(&self) -> Vec<Batch> {
        std::mem::take(&mut *self.batches.lock())
    }

    /// Take all stored points, flattened in commit order.
    pub fn take_points(&self) -> Vec<Point> {
        self.take_batches()
            .into_iter()
            .flat_map(Batch::into_points)
            .collect()
    }

    /// Number of batches written so far.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl Writer for MemoryWriter {
    async fn write(&self, batch: &Batch) -> Result<()> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

/// Adapts a synchronous closure into a [`Writer`].
pub struct FnWriter<F>(pub F);

#[async_trait]
impl<F> Writer for FnWriter<F>
where
    F: Fn(&Batch) -> Result<()> + Send + Sync,
{
    async fn write(&self, batch: &Batch) -> Result<()> {
        (self.0)(batch)
    }
}
