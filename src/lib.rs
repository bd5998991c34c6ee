//! Tally - measurement collection with client-side reduction.
//!
//! Producers report measurements (a name, a timestamp, numeric values and
//! descriptive dimensions). On the client, a reducing submitter merges
//! measurements that share dimensions before periodically sending them. On
//! the server, a collector batches incoming measurements and commits them to
//! a downstream store, retrying failed commits at a fixed interval.
//!
//! # Architecture
//!
//! - `core`: Measurement types, the reducible value algebra, config and errors
//! - `collector`: Single-consumer batching and retrying commit engine
//! - `receiver`: HTTP ingestion endpoint
//! - `client`: Reducing submitters and their HTTP/gRPC transports
//! - `cli`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use tally_lib::core::Config;
//! use tally_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let app = Application::new(config)?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod application;
pub mod cli;
pub mod client;
pub mod collector;
pub mod core;
pub mod receiver;

pub use crate::application::Application;
pub use crate::client::{Client, ClientOptions, Submitter};
pub use crate::collector::Collector;
pub use crate::core::{Config, Measurement, Result, TallyError, Value};
