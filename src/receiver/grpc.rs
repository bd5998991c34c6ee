//! gRPC streaming insert endpoint.
//!
//! Serves the client-streaming `tally.Ingest/Insert` call. Each streamed row is
//! decoded, validated and handed to the collector on its own; the reply counts
//! the rows that made it and the rows that did not.

use crate::core::{InsertReport, InsertRow, TallyError, INSERT_PATH};
use crate::receiver::MeasurementReceiver;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Service, StdError};
use tonic::server::{ClientStreamingService, Grpc};
use tonic::{Code, Request, Response, Status, Streaming};

/// Tower service answering the streaming insert call.
#[derive(Clone)]
pub struct IngestService {
    receiver: Arc<MeasurementReceiver>,
}

impl IngestService {
    pub fn new(receiver: Arc<MeasurementReceiver>) -> Self {
        Self { receiver }
    }
}

async fn insert(
    receiver: Arc<MeasurementReceiver>,
    request: Request<Streaming<InsertRow>>,
) -> Result<Response<InsertReport>, Status> {
    let mut rows = request.into_inner();
    let mut report = InsertReport::default();

    while let Some(row) = rows.message().await? {
        let stream = row.stream.clone();
        let outcome = match row.into_measurement() {
            Ok(measurement) => receiver.ingest_one(measurement).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => report.succeeded += 1,
            Err(TallyError::CollectorTerminated) => {
                return Err(Status::unavailable("Collector has terminated"));
            },
            Err(e) => {
                tracing::debug!("Rejected streamed '{}' measurement: {}", stream, e);
                report.errored += 1;
            },
        }
    }

    tracing::trace!(
        "Insert stream closed with {} inserted and {} errored",
        report.succeeded,
        report.errored
    );
    Ok(Response::new(report))
}

struct InsertCall(Arc<MeasurementReceiver>);

impl ClientStreamingService<InsertRow> for InsertCall {
    type Response = InsertReport;
    type Future = BoxFuture<Response<InsertReport>, Status>;

    fn call(&mut self, request: Request<Streaming<InsertRow>>) -> Self::Future {
        Box::pin(insert(Arc::clone(&self.0), request))
    }
}

impl<B> Service<http::Request<B>> for IngestService
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() != INSERT_PATH {
            return Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert("grpc-status", http::HeaderValue::from(Code::Unimplemented as i32));
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            });
        }

        let call = InsertCall(Arc::clone(&self.receiver));
        Box::pin(async move {
            let mut grpc = Grpc::new(ProstCodec::<InsertReport, InsertRow>::default());
            Ok(grpc.client_streaming(call, req).await)
        })
    }
}
