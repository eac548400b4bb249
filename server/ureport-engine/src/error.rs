//! Structured error types for the ingest engine.

use thiserror::Error;

/// A schema violation, qualified with the path of the offending field
/// (e.g. `core_backtrace[3].path`). Root-level errors have an empty path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", qualified(.path, .reason))]
pub struct SchemaError {
  pub path: String,
  pub reason: String,
}

impl SchemaError {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      path: String::new(),
      reason: reason.into(),
    }
  }

  /// Prefix the path with an enclosing mapping key.
  pub fn in_field(mut self, field: &str) -> Self {
    self.path = if self.path.is_empty() {
      field.to_string()
    } else if self.path.starts_with('[') {
      format!("{}{}", field, self.path)
    } else {
      format!("{}.{}", field, self.path)
    };
    self
  }

  /// Prefix the path with an enclosing sequence index.
  pub fn at_index(mut self, index: usize) -> Self {
    self.path = if self.path.is_empty() || self.path.starts_with('[') {
      format!("[{}]{}", index, self.path)
    } else {
      format!("[{}].{}", index, self.path)
    };
    self
  }
}

fn qualified(path: &str, reason: &str) -> String {
  if path.is_empty() {
    reason.to_string()
  } else {
    format!("{}: {}", path, reason)
  }
}

/// Configuration errors. Raised while building [`crate::Config`], never per ingest.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("unknown duplicate-detection policy: {0}")]
  UnknownDuplicatePolicy(String),

  #[error("invalid value for {key}: {value}")]
  InvalidValue { key: String, value: String },
}

impl ConfigError {
  pub fn invalid(key: &str, value: &str) -> Self {
    Self::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

/// Errors returned at the ingest boundary.
#[derive(Debug, Error)]
pub enum IngestError {
  #[error("schema: {0}")]
  Schema(#[from] SchemaError),

  #[error("insufficient signature data: {0}")]
  InsufficientSignatureData(String),

  #[error("unknown {role} package: {nevra}")]
  UnknownPackage { role: String, nevra: String },

  #[error("unknown operating system release: {name} {version}")]
  UnknownOpSysRelease { name: String, version: String },

  #[error("unknown architecture: {0}")]
  UnknownArchitecture(String),

  #[error("payload is {len} bytes, limit is {max}")]
  PayloadTooLarge { len: usize, max: usize },

  #[error("storage conflict: {0}")]
  StorageConflict(String),

  #[error("storage: {0}")]
  Storage(#[from] sqlx::Error),
}

impl IngestError {
  pub fn unknown_package(role: &str, nevra: String) -> Self {
    Self::UnknownPackage {
      role: role.to_string(),
      nevra,
    }
  }

  pub fn insufficient(msg: impl Into<String>) -> Self {
    Self::InsufficientSignatureData(msg.into())
  }

  /// Storage failures are transient from the caller's point of view; every
  /// other kind is a property of the payload and will fail again.
  pub fn is_retriable(&self) -> bool {
    matches!(self, Self::Storage(_) | Self::StorageConflict(_))
  }
}
