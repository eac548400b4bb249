//! uReport ingest core.
//!
//! Validates crash reports against a closed schema, hashes the crash thread
//! into a per-component signature, resolves packages against the catalog,
//! decides known-vs-new under a duplicate-detection policy and maintains the
//! aggregate Report rows, stat counters and day/week/month history in SQLite.
//!
//! One ingest is one transaction; a failed ingest leaves no rows behind.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod interner;
pub mod matcher;
pub mod problem;
pub mod resolver;
pub mod schema;
pub mod signature;
pub mod store;
pub mod types;

pub use config::Config;
pub use engine::Engine;
pub use error::{ConfigError, IngestError, SchemaError};
pub use matcher::DuplicatePolicy;
pub use store::Store;
pub use types::{IngestOptions, IngestOutcome, KnownCheck, Signature, UReport};
