//! Client-side reducing submitters.
//!
//! A [`Client`] hands out one [`Submitter`] per registered measurement name.
//! Submissions that share a dimension fingerprint are merged in memory with
//! the [`Value`](crate::core::Value) algebra, and all buffers are flushed to
//! the server on a fixed interval. Flushing swaps the buffers out under the
//! lock and sends them without holding it, so submitters are never blocked by
//! network I/O. A flush that fails to send is logged and dropped.

pub mod buffer;
pub mod transport;

pub use buffer::{BufferedMeasurement, Field, Fields, Values};
pub use transport::{
    GrpcClient, HttpTransport, InsertReport, Inserter, MeasurementsByName, RpcClient,
    RpcTransport, Transport,
};

use crate::core::{fingerprint, ClientConfig, Dimensions, Result, TallyError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Distinct keys buffered per registration when neither the registration nor
/// the options give a limit.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;

/// Hook invoked with `(name, fingerprint, ts, values, dimensions)` before a
/// submission is buffered. It must not block.
pub type BeforeSubmit = Arc<dyn Fn(&str, &str, DateTime<Utc>, &Values, &Dimensions) + Send + Sync>;

/// Options for building a [`Client`].
#[derive(Clone)]
pub struct ClientOptions {
    /// How often buffers are flushed
    pub batch_interval: Duration,
    /// Ingestion URL used by the HTTP transport
    pub server_url: String,
    /// Per-request timeout of the HTTP transport, also used when dialing gRPC
    pub request_timeout: Duration,
    /// Distinct keys per registration when `register` is given zero
    pub max_buffer_size: usize,
    /// Streaming client; when set it is used instead of HTTP
    pub rpc: Option<Arc<dyn RpcClient>>,
    /// Called before each submission is buffered
    pub before_submit: Option<BeforeSubmit>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            batch_interval: config.batch_interval,
            server_url: config.server_url.clone(),
            request_timeout: config.request_timeout,
            max_buffer_size: config.max_buffer_size,
            rpc: None,
            before_submit: None,
        }
    }
}

type Buffer = HashMap<String, BufferedMeasurement>;

#[derive(Default)]
struct State {
    buffers: HashMap<usize, Buffer>,
    next_id: usize,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    transport: Arc<dyn Transport>,
    before_submit: Option<BeforeSubmit>,
    max_buffer_size: usize,
}

/// Buffers reduced measurements and periodically sends them to the server.
pub struct Client {
    inner: Arc<Inner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Build a client, choosing the RPC transport when `options.rpc` is set
    /// and HTTP otherwise.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(mut options: ClientOptions) -> Result<Self> {
        let transport: Arc<dyn Transport> = match options.rpc.take() {
            Some(rpc) => Arc::new(RpcTransport::new(rpc)),
            None => {
                let http = HttpTransport::new(options.server_url.clone(), options.request_timeout)?;
                tracing::debug!("Reporting measurements to {}", http.url());
                Arc::new(http)
            },
        };
        Ok(Self::with_transport(options, transport))
    }

    /// Build a client from configuration, preferring the configured gRPC
    /// endpoint when one is set and reachable.
    pub async fn from_config(config: &ClientConfig) -> Result<Self> {
        let options = ClientOptions::from(config);
        match &config.rpc_endpoint {
            Some(endpoint) => Self::connect(options, endpoint).await,
            None => Self::new(options),
        }
    }

    /// Dial `grpc_endpoint` and use it if reachable, falling back to HTTP.
    pub async fn connect(mut options: ClientOptions, grpc_endpoint: &str) -> Result<Self> {
        tracing::debug!("Dialing {} with gRPC", grpc_endpoint);
        match GrpcClient::connect(grpc_endpoint, options.request_timeout).await {
            Ok(rpc) => {
                tracing::debug!("Using gRPC to report measurements");
                options.rpc = Some(Arc::new(rpc));
            },
            Err(e) => {
                tracing::error!("Unable to dial {}, will not use gRPC: {}", grpc_endpoint, e);
            },
        }
        Self::new(options)
    }

    /// Build a client around an explicit transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Self {
        let batch_interval = if options.batch_interval.is_zero() {
            tracing::debug!("batch_interval has to be greater than zero, using the default");
            ClientConfig::default().batch_interval
        } else {
            options.batch_interval
        };

        let max_buffer_size = if options.max_buffer_size == 0 {
            DEFAULT_MAX_BUFFER_SIZE
        } else {
            options.max_buffer_size
        };

        let inner = Arc::new(Inner {
            state: Mutex::new(State::default()),
            transport,
            before_submit: options.before_submit,
            max_buffer_size,
        });

        tracing::debug!(
            transport = inner.transport.name(),
            "Reporting measurements every {:?}",
            batch_interval
        );
        let flusher = tokio::spawn(send_periodically(Arc::clone(&inner), batch_interval));

        Self {
            inner,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Register a measurement name and return its submitter.
    ///
    /// `max_buffer_size` caps the distinct dimension fingerprints buffered
    /// between flushes; zero selects the client's default.
    pub fn register(&self, name: impl Into<String>, max_buffer_size: usize) -> Submitter {
        let max_buffer_size = if max_buffer_size == 0 {
            tracing::debug!(
                "max_buffer_size has to be greater than zero, defaulting to {}",
                self.inner.max_buffer_size
            );
            self.inner.max_buffer_size
        } else {
            max_buffer_size
        };

        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            id
        };

        Submitter {
            id,
            name: name.into(),
            max_buffer_size,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Send everything buffered so far, returning how many measurements the
    /// server accepted.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }

    /// Stop periodic flushing and flush what remains.
    ///
    /// Submitters registered with this client fail with
    /// [`TallyError::ClientClosed`] afterwards.
    pub async fn close(&self) -> usize {
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.abort();
        }
        self.inner.state.lock().closed = true;
        self.inner.flush().await
    }

    /// Number of measurements currently buffered across all registrations.
    pub fn buffered(&self) -> usize {
        self.inner.state.lock().buffers.values().map(HashMap::len).sum()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.get_mut().take() {
            flusher.abort();
        }
    }
}

async fn send_periodically(inner: Arc<Inner>, batch_interval: Duration) {
    let mut ticker = tokio::time::interval(batch_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        inner.flush().await;
    }
}

impl Inner {
    async fn flush(&self) -> usize {
        let buffers = std::mem::take(&mut self.state.lock().buffers);

        let count: usize = buffers.values().map(HashMap::len).sum();
        if count == 0 {
            tracing::debug!("Nothing to report");
            return 0;
        }

        let mut batch = MeasurementsByName::new();
        for measurement in buffers.into_values().flat_map(HashMap::into_values) {
            batch
                .entry(measurement.name.clone())
                .or_default()
                .push(measurement);
        }

        tracing::debug!(
            transport = self.transport.name(),
            "Attempting to report {} measurements",
            count
        );
        match self.transport.send(&batch).await {
            Ok(sent) => {
                tracing::debug!("Sent {} measurements", sent);
                sent
            },
            Err(TallyError::PartialSend { inserted, source }) => {
                tracing::error!("Error sending batch after {} measurements: {}", inserted, source);
                inserted
            },
            Err(e) => {
                tracing::error!("Error sending batch: {}", e);
                0
            },
        }
    }
}

/// Reduces and buffers measurements for one registered name.
#[derive(Clone)]
pub struct Submitter {
    id: usize,
    name: String,
    max_buffer_size: usize,
    inner: Arc<Inner>,
}

impl Submitter {
    /// The registered measurement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer one event.
    ///
    /// `fields` holds the dimensions; any [`Field::Metric`] among them is
    /// reported as a value instead. A submission whose fingerprint is already
    /// buffered is merged into it. A new fingerprint beyond the registration's
    /// capacity fails with [`TallyError::BufferOverflow`] and is dropped.
    /// Nothing is buffered once the client is closed.
    pub fn submit(&self, mut values: Values, fields: Fields) -> Result<()> {
        let dimensions = buffer::split_fields(&mut values, fields);
        let key = fingerprint(&dimensions)?;
        let ts = Utc::now();

        if let Some(before_submit) = &self.inner.before_submit {
            before_submit(&self.name, &key, ts, &values, &dimensions);
        }

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TallyError::ClientClosed);
        }
        let buffer = state.buffers.entry(self.id).or_default();
        if let Some(existing) = buffer.get_mut(&key) {
            existing.absorb(ts, values);
            return Ok(());
        }

        if buffer.len() >= self.max_buffer_size {
            return Err(TallyError::BufferOverflow {
                name: self.name.clone(),
                max: self.max_buffer_size,
            });
        }

        buffer.insert(
            key,
            BufferedMeasurement {
                name: self.name.clone(),
                ts,
                values,
                dimensions,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every batch it is asked to send.
    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<MeasurementsByName>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, batch: &MeasurementsByName) -> Result<usize> {
            self.batches.lock().push(batch.clone());
            if self.fail {
                return Err(TallyError::transport("unreachable"));
            }
            Ok(batch.values().map(Vec::len).sum())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn options(batch_interval: Duration) -> ClientOptions {
        ClientOptions {
            batch_interval,
            ..Default::default()
        }
    }

    fn client(transport: Arc<RecordingTransport>) -> Client {
        Client::with_transport(options(Duration::from_secs(3600)), transport)
    }

    fn sum(x: f64) -> Values {
        Values::from([("x".to_string(), Value::Sum(x))])
    }

    fn dims(host: &str) -> Fields {
        Fields::from([("host".to_string(), Field::from(host))])
    }

    #[tokio::test]
    async fn test_same_fingerprint_is_reduced() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());
        let submit = client.register("requests", 10);

        for _ in 0..25 {
            submit.submit(sum(1.0), dims("h1")).unwrap();
        }
        assert_eq!(client.buffered(), 1);
        assert_eq!(client.flush().await, 1);

        let batches = transport.batches.lock();
        let measurements = &batches[0]["requests"];
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].values["x"].get(), 25.0);
    }

    #[tokio::test]
    async fn test_overflow_rejects_new_keys_only() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());
        let submit = client.register("requests", 2);

        submit.submit(sum(1.0), dims("h1")).unwrap();
        submit.submit(sum(1.0), dims("h2")).unwrap();
        let err = submit.submit(sum(1.0), dims("h3")).unwrap_err();
        assert!(matches!(err, TallyError::BufferOverflow { max: 2, .. }));

        // existing keys still merge
        submit.submit(sum(4.0), dims("h1")).unwrap();
        client.flush().await;

        let batches = transport.batches.lock();
        let measurements = &batches[0]["requests"];
        assert_eq!(measurements.len(), 2);
        let h1 = measurements
            .iter()
            .find(|m| m.dimensions["host"].to_string() == "h1")
            .unwrap();
        assert_eq!(h1.values["x"].get(), 5.0);
    }

    #[tokio::test]
    async fn test_zero_capacity_uses_client_default() {
        let client = Client::with_transport(
            ClientOptions {
                max_buffer_size: 1,
                ..options(Duration::from_secs(3600))
            },
            Arc::new(RecordingTransport::default()),
        );
        let submit = client.register("requests", 0);

        submit.submit(sum(1.0), dims("h1")).unwrap();
        assert!(submit.submit(sum(1.0), dims("h2")).is_err());
    }

    #[tokio::test]
    async fn test_from_config_falls_back_to_http() {
        let config = ClientConfig {
            rpc_endpoint: Some("http://127.0.0.1:1".to_string()),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let client = Client::from_config(&config).await.unwrap();
        assert_eq!(client.inner.transport.name(), "http");
    }

    #[tokio::test]
    async fn test_capacity_is_per_registration_and_resets_on_flush() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());
        let a = client.register("a", 1);
        let b = client.register("b", 1);

        a.submit(sum(1.0), dims("h1")).unwrap();
        b.submit(sum(1.0), dims("h1")).unwrap();
        assert!(a.submit(sum(1.0), dims("h2")).is_err());

        assert_eq!(client.flush().await, 2);
        a.submit(sum(1.0), dims("h2")).unwrap();
    }

    #[tokio::test]
    async fn test_metric_fields_become_values() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());
        let submit = client.register("ops", 10);

        let mut fields = dims("h1");
        fields.insert("latency".to_string(), Field::from(Value::avg(10.0)));
        submit.submit(sum(1.0), fields.clone()).unwrap();
        fields.insert("latency".to_string(), Field::from(Value::avg(20.0)));
        submit.submit(sum(1.0), fields).unwrap();

        assert_eq!(client.buffered(), 1);
        client.flush().await;

        let batches = transport.batches.lock();
        let m = &batches[0]["ops"][0];
        assert_eq!(m.values["latency"].get(), 15.0);
        assert!(!m.dimensions.contains_key("latency"));
    }

    #[tokio::test]
    async fn test_flush_groups_by_name_and_empty_flush_is_noop() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());

        assert_eq!(client.flush().await, 0);
        assert!(transport.batches.lock().is_empty());

        client.register("a", 0).submit(sum(1.0), dims("h1")).unwrap();
        client.register("a", 0).submit(sum(1.0), dims("h1")).unwrap();
        client.register("b", 0).submit(sum(1.0), dims("h1")).unwrap();
        assert_eq!(client.flush().await, 3);

        let batches = transport.batches.lock();
        assert_eq!(batches[0]["a"].len(), 2, "registrations are buffered separately");
        assert_eq!(batches[0]["b"].len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_is_not_requeued() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let client = client(transport.clone());
        let submit = client.register("requests", 10);

        submit.submit(sum(1.0), dims("h1")).unwrap();
        assert_eq!(client.flush().await, 0);
        assert_eq!(client.buffered(), 0);
        assert_eq!(client.flush().await, 0);
        assert_eq!(transport.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let transport = Arc::new(RecordingTransport::default());
        let client = Client::with_transport(options(Duration::from_millis(50)), transport.clone());
        client.register("requests", 10).submit(sum(1.0), dims("h1")).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.batches.lock().len(), 1);
        assert_eq!(client.buffered(), 0);
    }

    #[tokio::test]
    async fn test_close_flushes_remaining() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());
        client.register("requests", 10).submit(sum(1.0), dims("h1")).unwrap();

        assert_eq!(client.close().await, 1);
        assert_eq!(transport.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(transport.clone());
        let submit = client.register("requests", 10);
        client.close().await;

        let result = submit.submit(sum(1.0), dims("h1"));
        assert!(matches!(result, Err(TallyError::ClientClosed)));
        assert_eq!(client.buffered(), 0);
        assert_eq!(client.flush().await, 0);
        assert!(transport.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_before_submit_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let hook: BeforeSubmit = Arc::new(
            move |name: &str, key: &str, _ts: DateTime<Utc>, values: &Values, dims: &Dimensions| {
                assert_eq!(name, "requests");
                assert_eq!(key, r#"{"host":"h1"}"#);
                assert!(values.contains_key("x"));
                assert_eq!(dims.len(), 1);
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );
        let client = Client::with_transport(
            ClientOptions {
                before_submit: Some(hook),
                ..options(Duration::from_secs(3600))
            },
            Arc::new(RecordingTransport::default()),
        );

        let submit = client.register("requests", 10);
        submit.submit(sum(1.0), dims("h1")).unwrap();
        submit.submit(sum(1.0), dims("h1")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
