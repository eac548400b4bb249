//! Core types for the ingest engine (JSON contracts + internal models).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound types (JSON contract, as sent by clients)
// ---------------------------------------------------------------------------

/// A uReport after it passed schema validation. Deserialization only runs on
/// values the validator accepted, so every field here is known to be well-formed.
#[derive(Debug, Clone, Deserialize)]
pub struct UReport {
  #[serde(rename = "type")]
  pub problem_type: String,
  pub reason: String,
  pub uptime: i64,
  pub executable: String,
  pub installed_package: PackageRef,
  #[serde(default)]
  pub running_package: Option<PackageRef>,
  pub related_packages: Vec<RelatedPackage>,
  pub os: OsRef,
  pub architecture: String,
  pub reporter: ReporterRef,
  pub crash_thread: i64,
  pub core_backtrace: Vec<CoreFrame>,
  #[serde(default)]
  pub user_type: Option<String>,
  #[serde(default)]
  pub os_state: Option<OsState>,
  #[serde(default)]
  pub selinux: Option<Selinux>,
  #[serde(default)]
  pub proc_status: Option<serde_json::Map<String, serde_json::Value>>,
  #[serde(default)]
  pub proc_limits: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Package reference as sent by the client (NEVRA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
  pub name: String,
  pub epoch: i64,
  pub version: String,
  pub release: String,
  pub architecture: String,
}

impl fmt::Display for PackageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}-{}:{}-{}.{}",
      self.name, self.epoch, self.version, self.release, self.architecture
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedPackage {
  pub installed_package: PackageRef,
  #[serde(default)]
  pub running_package: Option<PackageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OsRef {
  pub name: String,
  pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterRef {
  pub name: String,
  pub version: String,
}

/// One frame of `core_backtrace`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoreFrame {
  pub thread: i64,
  pub frame: i64,
  pub buildid: String,
  pub path: String,
  pub offset: i64,
  #[serde(default)]
  pub funcname: Option<String>,
  #[serde(default)]
  pub funchash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsState {
  pub suspend: String,
  pub boot: String,
  pub login: String,
  pub logout: String,
  pub shutdown: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Selinux {
  pub mode: String,
  #[serde(default)]
  pub context: Option<String>,
  #[serde(default)]
  pub policy_package: Option<PackageRef>,
}

// ---------------------------------------------------------------------------
// Problem types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
  Python,
  Userspace,
  Kerneloops,
}

impl ProblemKind {
  pub const ALL: [ProblemKind; 3] = [Self::Python, Self::Userspace, Self::Kerneloops];

  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "python" => Some(Self::Python),
      "userspace" => Some(Self::Userspace),
      "kerneloops" => Some(Self::Kerneloops),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Python => "python",
      Self::Userspace => "userspace",
      Self::Kerneloops => "kerneloops",
    }
  }

  /// Value stored in `reports.type`.
  pub fn report_type(self) -> &'static str {
    match self {
      Self::Python => "PYTHON",
      Self::Userspace => "USERSPACE",
      Self::Kerneloops => "KERNELOOPS",
    }
  }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Which frame attribute fed the signature hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HashType {
  Names,
  Hashes,
}

impl HashType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Names => "NAMES",
      Self::Hashes => "HASHES",
    }
  }
}

/// Identity of a crash within a component: (hash type, hex digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
  pub hash_type: HashType,
  pub hash: String,
}

// ---------------------------------------------------------------------------
// Ingest contract
// ---------------------------------------------------------------------------

/// Per-submission knobs supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
  /// Occurrence time; defaults to now.
  pub received_at: Option<DateTime<Utc>>,
  /// Number of occurrences this submission stands for. 0 is treated as 1.
  pub count: u32,
  /// Confirmed submitter identity used for the history `unique` counters.
  /// Without it every ingest counts as unique.
  pub identity: Option<String>,
}

impl IngestOptions {
  pub fn increment(&self) -> i64 {
    i64::from(self.count.max(1))
  }
}

/// Result of one successful ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
  pub known: bool,
  pub signature: Signature,
  pub report_id: i64,
  /// True when this ingest created the Report.
  pub created: bool,
  /// Bug URLs associated with the Report, only filled in when `known`.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub bug_urls: Vec<String>,
}

/// Answer of a dry-run lookup: nothing is written.
#[derive(Debug, Clone, Serialize)]
pub struct KnownCheck {
  pub known: bool,
  pub signature: Signature,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub report_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for rejected input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
