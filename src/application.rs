//! Server application wiring the collector to the HTTP ingestion endpoint.

use crate::collector::{Collector, JsonLinesWriter, LogWriter, Writer};
use crate::core::{Config, Result, TallyError};
use crate::receiver::{create_http_router, MeasurementReceiver};
use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Coordinates the collector, the receiver and the HTTP server.
pub struct Application {
    /// The batching collector
    collector: Collector,
    /// Ingestion front end feeding the collector
    receiver: Arc<MeasurementReceiver>,
    /// Application configuration
    config: Config,
}

impl Application {
    /// Create an application writing committed batches to the configured
    /// output file, or to the log when none is set.
    pub fn new(config: Config) -> Result<Self> {
        let writer: Arc<dyn Writer> = match &config.server.output {
            Some(path) => {
                let writer = JsonLinesWriter::new(path.clone());
                tracing::info!("Writing committed batches to {}", writer.path().display());
                Arc::new(writer)
            },
            None => Arc::new(LogWriter),
        };
        Self::with_writer(config, writer)
    }

    /// Create an application committing batches to `writer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_writer(config: Config, writer: Arc<dyn Writer>) -> Result<Self> {
        config.validate()?;

        let collector = Collector::start(config.collector.clone(), writer);
        let receiver = Arc::new(MeasurementReceiver::from_config(collector.clone(), &config.server));

        Ok(Self {
            collector,
            receiver,
            config,
        })
    }

    /// The ingestion router.
    pub fn router(&self) -> Router {
        create_http_router(Arc::clone(&self.receiver), self.config.server.max_body_bytes)
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(self.config.server.bind_address, self.config.server.http_port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TallyError::config(format!("Failed to bind HTTP receiver to {}: {}", addr, e))
        })?;

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal, stopping...");
        })
        .await
    }

    /// Serve on `listener` until `shutdown` completes or the collector
    /// terminates. Collector termination is returned as an error.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!("Accepting measurements at http://{}/measurements", addr);

        let reporter = self.receiver.spawn_reporter(self.config.server.report_interval);
        let server = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .into_future();

        let result = tokio::select! {
            result = server => result.map_err(TallyError::from),
            error = self.collector.wait(None) => match error {
                Some(e) => {
                    tracing::error!("Collector terminated, shutting down: {}", e);
                    Err(TallyError::Terminated(e))
                },
                None => Ok(()),
            },
        };

        reporter.abort();
        result
    }

    /// Get a reference to the collector.
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Get a reference to the receiver.
    pub fn receiver(&self) -> &Arc<MeasurementReceiver> {
        &self.receiver
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
