//! Streaming insert transport.
//!
//! For every measurement name in a flush an insert stream is opened, each
//! measurement is inserted, and closing the stream yields the number of rows
//! the server stored. The [`RpcClient`] and [`Inserter`] traits keep the
//! transport independent of the wire protocol; [`GrpcClient`] implements them
//! over a tonic client-streaming call.

use crate::client::transport::{MeasurementsByName, Transport};
use crate::client::Values;
use crate::core::{Dimensions, Result, TallyError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

pub use crate::core::wire::{InsertReport, InsertRow, INSERT_PATH};

/// Rows buffered between the inserter and the gRPC call.
const INSERT_BUFFER: usize = 256;

/// Opens insert streams.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Open an insert stream for `stream`.
    async fn new_inserter(&self, stream: &str) -> Result<Box<dyn Inserter>>;
}

/// An open insert stream.
#[async_trait]
pub trait Inserter: Send {
    /// Insert one measurement.
    async fn insert(
        &mut self,
        ts: DateTime<Utc>,
        dimensions: &Dimensions,
        values: &Values,
    ) -> Result<()>;

    /// Finish the stream and obtain the server's report.
    async fn close(self: Box<Self>) -> Result<InsertReport>;
}

/// Sends each measurement name over its own insert stream.
pub struct RpcTransport {
    client: Arc<dyn RpcClient>,
}

impl RpcTransport {
    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self { client }
    }
}

fn partial(inserted: usize, source: TallyError) -> TallyError {
    TallyError::PartialSend {
        inserted,
        source: Box::new(source),
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn send(&self, batch: &MeasurementsByName) -> Result<usize> {
        let mut inserted = 0usize;

        for (name, measurements) in batch {
            let mut inserter = self
                .client
                .new_inserter(name)
                .await
                .map_err(|e| partial(inserted, e))?;

            for m in measurements {
                if let Err(e) = inserter.insert(m.ts, &m.dimensions, &m.values).await {
                    if let Err(close_err) = inserter.close().await {
                        tracing::debug!("Error closing failed inserter: {}", close_err);
                    }
                    return Err(partial(inserted, e));
                }
            }

            let report = inserter.close().await.map_err(|e| partial(inserted, e))?;
            if report.errored > 0 {
                tracing::warn!("Server failed to insert {} '{}' measurements", report.errored, name);
            }
            inserted += report.succeeded as usize;
        }

        Ok(inserted)
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}

/// gRPC implementation of [`RpcClient`].
#[derive(Clone)]
pub struct GrpcClient {
    channel: Channel,
}

impl GrpcClient {
    /// Dial `endpoint`, giving up after `timeout`.
    pub async fn connect(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint: String = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| TallyError::transport(format!("Invalid gRPC endpoint {}: {}", endpoint, e)))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect()
            .await
            .map_err(|e| TallyError::transport(format!("Unable to dial {}: {}", endpoint, e)))?;

        tracing::debug!("Connected to gRPC endpoint {}", endpoint);
        Ok(Self { channel })
    }
}

#[async_trait]
impl RpcClient for GrpcClient {
    async fn new_inserter(&self, stream: &str) -> Result<Box<dyn Inserter>> {
        let (rows, receiver) = mpsc::channel::<InsertRow>(INSERT_BUFFER);
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());

        let call = tokio::spawn(async move {
            grpc.ready()
                .await
                .map_err(|e| TallyError::transport(format!("gRPC channel not ready: {}", e)))?;

            let requests = Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|row| (row, receiver))
            }));
            let codec: ProstCodec<InsertRow, InsertReport> = ProstCodec::default();
            let response = grpc
                .client_streaming(
                    tonic::Request::new(requests),
                    PathAndQuery::from_static(INSERT_PATH),
                    codec,
                )
                .await?;
            Ok::<_, TallyError>(response.into_inner())
        });

        Ok(Box::new(GrpcInserter {
            stream: stream.to_string(),
            rows,
            call,
        }))
    }
}

struct GrpcInserter {
    stream: String,
    rows: mpsc::Sender<InsertRow>,
    call: JoinHandle<Result<InsertReport>>,
}

#[async_trait]
impl Inserter for GrpcInserter {
    async fn insert(
        &mut self,
        ts: DateTime<Utc>,
        dimensions: &Dimensions,
        values: &Values,
    ) -> Result<()> {
        let reduced = values.iter().map(|(k, v)| (k.clone(), v.get())).collect();
        let row = InsertRow::new(&self.stream, ts, dimensions, reduced)?;
        self.rows
            .send(row)
            .await
            .map_err(|_| TallyError::transport("Insert stream closed by server"))
    }

    async fn close(self: Box<Self>) -> Result<InsertReport> {
        let GrpcInserter { rows, call, .. } = *self;
        drop(rows);
        call.await
            .map_err(|e| TallyError::transport(format!("Insert call failed: {}", e)))?
    }
}
