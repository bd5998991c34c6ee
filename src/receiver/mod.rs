//! Ingestion boundary.
//!
//! Validates measurements received from the network, optionally sheds a
//! fraction of requests, and forwards accepted measurements to the
//! [`Collector`](crate::collector::Collector).

pub mod grpc;
pub mod http;

pub use grpc::IngestService;
pub use http::create_http_router;

use crate::collector::Collector;
use crate::core::{Measurement, Result, ServerConfig, TallyError};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receives measurement batches and feeds the collector.
pub struct MeasurementReceiver {
    collector: Collector,
    sample_rate: f64,
    accepted: AtomicU64,
}

impl MeasurementReceiver {
    /// Create a receiver forwarding into `collector`.
    pub fn new(collector: Collector, sample_rate: f64) -> Self {
        Self {
            collector,
            sample_rate: sample_rate.clamp(0.0, 1.0),
            accepted: AtomicU64::new(0),
        }
    }

    /// Create a receiver from server configuration.
    pub fn from_config(collector: Collector, config: &ServerConfig) -> Self {
        Self::new(collector, config.sample_rate)
    }

    /// Whether the next request should be inserted.
    pub fn should_sample(&self) -> bool {
        if self.sample_rate >= 1.0 {
            true
        } else if self.sample_rate <= 0.0 {
            false
        } else {
            rand::random::<f64>() < self.sample_rate
        }
    }

    /// Validate and forward a decoded request, returning how many
    /// measurements were accepted.
    ///
    /// The whole request is rejected if any measurement is invalid. Once
    /// validated, individual submit failures are logged and skipped, except
    /// collector termination which aborts the request.
    pub async fn ingest(&self, mut measurements: Vec<Measurement>) -> Result<usize> {
        validate_all(&measurements)?;

        let now = Utc::now();
        for measurement in &mut measurements {
            measurement.ts.get_or_insert(now);
        }

        let count = measurements.len();
        self.accepted.fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!("Received {} measurements", count);

        for measurement in measurements {
            match self.collector.submit(measurement).await {
                Ok(()) => {},
                Err(TallyError::CollectorTerminated) => return Err(TallyError::CollectorTerminated),
                Err(e) => tracing::error!("Error saving measurement, continuing: {}", e),
            }
        }

        Ok(count)
    }

    /// Validate and forward a single streamed measurement.
    ///
    /// Unlike [`ingest`](Self::ingest) there is no request to reject as a
    /// whole, so an invalid measurement only fails itself.
    pub async fn ingest_one(&self, mut measurement: Measurement) -> Result<()> {
        measurement.validate()?;
        measurement.ts.get_or_insert_with(Utc::now);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.collector.submit(measurement).await
    }

    /// Measurements accepted since the last call, resetting the counter.
    pub fn take_accepted(&self) -> u64 {
        self.accepted.swap(0, Ordering::Relaxed)
    }

    /// The collector this receiver feeds.
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Periodically log accepted-measurement throughput.
    pub fn spawn_reporter(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let receiver = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            let mut start = Instant::now();
            loop {
                ticker.tick().await;
                let elapsed = start.elapsed().as_secs_f64();
                let count = receiver.take_accepted();
                let rate = if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 };
                tracing::debug!(
                    measurements = count,
                    per_second = rate as u64,
                    "Processed {} measurements at {} per second",
                    count,
                    rate as u64
                );
                start = Instant::now();
            }
        })
    }
}

fn validate_all(measurements: &[Measurement]) -> Result<()> {
    if measurements.is_empty() {
        return Err(TallyError::validation("Please include at least 1 measurement"));
    }
    measurements.iter().try_for_each(Measurement::validate)
}
