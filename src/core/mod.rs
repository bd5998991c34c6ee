//! Core domain models shared by the collector, receiver and client.
//!
//! This module contains the measurement types, the reducible value algebra,
//! configuration, errors and the retry helper.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;
pub mod value;
pub mod wire;

// Re-export commonly used types
pub use config::{ClientConfig, CollectorConfig, Config, ConfigBuilder, ServerConfig};
pub use error::{Result, TallyError};
pub use types::{fingerprint, Dimensions, Measurement, Scalar};
pub use value::Value;
pub use wire::{InsertReport, InsertRow, INSERT_PATH};
