//! Senders that deliver flushed measurements to the server.
//!
//! Two adapters are provided: a batched JSON POST ([`HttpTransport`]) and a
//! per-name insert stream over gRPC ([`RpcTransport`]). A transport is chosen
//! once when the client is built.

pub mod http;
pub mod rpc;

pub use http::HttpTransport;
pub use rpc::{GrpcClient, InsertReport, InsertRow, Inserter, RpcClient, RpcTransport};

use crate::client::BufferedMeasurement;
use crate::core::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Flushed measurements grouped by measurement name.
pub type MeasurementsByName = BTreeMap<String, Vec<BufferedMeasurement>>;

/// Delivers one flush worth of measurements.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the batch, returning how many measurements the server accepted.
    ///
    /// Failures are not retried by the caller.
    async fn send(&self, batch: &MeasurementsByName) -> Result<usize>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}
