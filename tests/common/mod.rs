//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tally_lib::collector::{Collector, Writer};
use tally_lib::core::{Config, ConfigBuilder, Result};
use tally_lib::Application;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub collector: Collector,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    /// Start serving `config`, committing batches to `writer`.
    pub async fn start(config: Config, writer: Arc<dyn Writer>) -> Self {
        let app = Application::with_writer(config, writer).unwrap();
        let collector = app.collector().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(app.serve(listener, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            collector,
            shutdown: Some(shutdown),
            handle,
        }
    }

    /// Ingestion URL of this server.
    pub fn url(&self) -> String {
        format!("http://{}/measurements", self.addr)
    }

    /// gRPC endpoint of this server.
    pub fn grpc_endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request shutdown and return how serving ended.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join().await
    }

    /// Wait for the server to stop on its own.
    pub async fn join(self) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Config tuned for fast tests: small batches, short retry interval.
pub fn fast_config(batch_size: usize) -> ConfigBuilder {
    ConfigBuilder::new()
        .batch_size(batch_size)
        .max_retries(2)
        .retry_interval(Duration::from_millis(10))
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
