//! Duplicate detection: decides whether a signature names a known Report.
//!
//! Gathering evidence (hash lookup, stats, bugs) is async and touches the
//! store; the decision itself is a pure function of that evidence.

use std::fmt;
use std::str::FromStr;

use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::ConfigError;
use crate::store::query::{self, BugRow};
use crate::types::{OsRef, Signature};

/// Stat dimension holding per-OS-release occurrence counts.
pub const OPSYSRELEASE_DIMENSION: &str = "opsysrelease";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
  /// Any Report with the same signature in the same component.
  #[default]
  Exact,
  /// Exact match that already has an occurrence on the same OS release.
  EqualUreportExists,
  /// Exact match with a bug filed against the same OS major.minor version.
  BugOsMinorVersion,
  /// Exact match with a bug filed against the same OS major version.
  BugOsMajorVersion,
}

impl DuplicatePolicy {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Exact => "EXACT",
      Self::EqualUreportExists => "EQUAL_UREPORT_EXISTS",
      Self::BugOsMinorVersion => "BUG_OS_MINOR_VERSION",
      Self::BugOsMajorVersion => "BUG_OS_MAJOR_VERSION",
    }
  }

  fn needs_bugs(self) -> bool {
    matches!(self, Self::BugOsMinorVersion | Self::BugOsMajorVersion)
  }

  /// Whether an exactly matching Report counts as known under this policy.
  pub fn decide(self, os: &OsRef, evidence: &Evidence) -> bool {
    match self {
      Self::Exact => true,
      Self::EqualUreportExists => evidence.seen_on_release,
      Self::BugOsMinorVersion => evidence
        .bugs
        .iter()
        .any(|bug| bug_matches(bug, os, same_minor_version)),
      Self::BugOsMajorVersion => evidence
        .bugs
        .iter()
        .any(|bug| bug_matches(bug, os, same_major_version)),
    }
  }
}

impl FromStr for DuplicatePolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "" | "EXACT" => Ok(Self::Exact),
      "EQUAL_UREPORT_EXISTS" => Ok(Self::EqualUreportExists),
      "BUG_OS_MINOR_VERSION" => Ok(Self::BugOsMinorVersion),
      "BUG_OS_MAJOR_VERSION" => Ok(Self::BugOsMajorVersion),
      other => Err(ConfigError::UnknownDuplicatePolicy(other.to_string())),
    }
  }
}

impl fmt::Display for DuplicatePolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Facts about the candidate Report the policies look at.
#[derive(Debug, Default)]
pub struct Evidence {
  /// A prior occurrence is recorded against the submitter's OS release.
  pub seen_on_release: bool,
  pub bugs: Vec<BugRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
  /// The Report sharing the signature, if any.
  pub report: Option<i64>,
  pub known: bool,
}

fn bug_matches(bug: &BugRow, os: &OsRef, same: fn(&str, &str) -> bool) -> bool {
  match (&bug.os_name, &bug.os_version) {
    (Some(name), Some(version)) => name.eq_ignore_ascii_case(&os.name) && same(version, &os.version),
    _ => false,
  }
}

fn version_parts(version: &str) -> (&str, Option<&str>) {
  let mut parts = version.split('.');
  let major = parts.next().unwrap_or_default();
  (major, parts.next())
}

pub fn same_major_version(a: &str, b: &str) -> bool {
  version_parts(a).0 == version_parts(b).0
}

pub fn same_minor_version(a: &str, b: &str) -> bool {
  version_parts(a) == version_parts(b)
}

/// Lowest id wins when the unique key was somehow violated.
pub fn pick_report(ids: &[i64], signature: &Signature) -> Option<i64> {
  if ids.len() > 1 {
    warn!(
      hash = %signature.hash,
      hash_type = signature.hash_type.as_str(),
      reports = ?ids,
      "integrity: several reports share one signature, using the lowest id"
    );
  }
  ids.iter().min().copied()
}

/// Look up the Report for `signature` within a component and apply `policy`.
pub async fn match_report(
  conn: &mut SqliteConnection,
  signature: &Signature,
  component_id: i64,
  opsysrelease_id: i64,
  os: &OsRef,
  policy: DuplicatePolicy,
) -> Result<MatchResult, sqlx::Error> {
  let ids = query::find_report_ids(conn, signature, component_id).await?;
  let Some(report) = pick_report(&ids, signature) else {
    return Ok(MatchResult {
      report: None,
      known: false,
    });
  };

  let mut evidence = Evidence::default();
  if policy == DuplicatePolicy::EqualUreportExists {
    evidence.seen_on_release =
      query::stat_exists(conn, report, OPSYSRELEASE_DIMENSION, &opsysrelease_id.to_string()).await?;
  }
  if policy.needs_bugs() {
    evidence.bugs = query::bugs_for_report(conn, report).await?;
  }

  Ok(MatchResult {
    report: Some(report),
    known: policy.decide(os, &evidence),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::HashType;

  fn os(version: &str) -> OsRef {
    OsRef {
      name: "CentOS".into(),
      version: version.into(),
    }
  }

  fn bug(name: &str, version: &str) -> BugRow {
    BugRow {
      url: "https://bugzilla.example.org/show_bug.cgi?id=1".into(),
      os_name: Some(name.into()),
      os_version: Some(version.into()),
    }
  }

  #[test]
  fn policy_names_round_trip() {
    for p in [
      DuplicatePolicy::Exact,
      DuplicatePolicy::EqualUreportExists,
      DuplicatePolicy::BugOsMinorVersion,
      DuplicatePolicy::BugOsMajorVersion,
    ] {
      assert_eq!(p.as_str().parse::<DuplicatePolicy>().unwrap(), p);
    }
    assert_eq!("".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Exact);
    assert!("BUGS_OS_MAJOR_VERSION".parse::<DuplicatePolicy>().is_err());
  }

  #[test]
  fn version_comparisons() {
    assert!(same_minor_version("6.7", "6.7"));
    assert!(!same_minor_version("6.7", "6.8"));
    assert!(same_major_version("6.7", "6.8"));
    assert!(!same_major_version("6.7", "7.1"));
    assert!(same_minor_version("20", "20"));
    assert!(!same_minor_version("20", "20.1"));
  }

  #[test]
  fn exact_needs_no_evidence() {
    assert!(DuplicatePolicy::Exact.decide(&os("6.7"), &Evidence::default()));
    assert!(!DuplicatePolicy::EqualUreportExists.decide(&os("6.7"), &Evidence::default()));
  }

  #[test]
  fn bug_policies_compare_os_versions() {
    let evidence = Evidence {
      seen_on_release: false,
      bugs: vec![bug("CentOS", "6.7")],
    };
    assert!(DuplicatePolicy::BugOsMinorVersion.decide(&os("6.7"), &evidence));
    assert!(!DuplicatePolicy::BugOsMinorVersion.decide(&os("6.8"), &evidence));
    assert!(DuplicatePolicy::BugOsMajorVersion.decide(&os("6.8"), &evidence));
    assert!(!DuplicatePolicy::BugOsMajorVersion.decide(&os("7.1"), &evidence));
  }

  #[test]
  fn bug_without_release_never_matches() {
    let evidence = Evidence {
      seen_on_release: false,
      bugs: vec![BugRow {
        url: "https://bugzilla.example.org/show_bug.cgi?id=2".into(),
        os_name: None,
        os_version: None,
      }],
    };
    assert!(!DuplicatePolicy::BugOsMajorVersion.decide(&os("6.7"), &evidence));
  }

  #[test]
  fn bug_on_other_os_never_matches() {
    let evidence = Evidence {
      seen_on_release: false,
      bugs: vec![bug("Fedora", "6.7")],
    };
    assert!(!DuplicatePolicy::BugOsMinorVersion.decide(&os("6.7"), &evidence));
  }

  #[test]
  fn lowest_id_is_picked() {
    let sig = Signature {
      hash_type: HashType::Names,
      hash: "00".into(),
    };
    assert_eq!(pick_report(&[9, 3, 7], &sig), Some(3));
    assert_eq!(pick_report(&[], &sig), None);
  }
}
