//! Exact-match package resolution against the catalog of one OS release.

use std::fmt;

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::IngestError;
use crate::store::query::{self, PackageRow};
use crate::types::{PackageRef, UReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageRole {
  Installed,
  Running,
  RelatedInstalled,
  RelatedRunning,
  SelinuxPolicy,
}

impl PackageRole {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Installed => "installed_package",
      Self::Running => "running_package",
      Self::RelatedInstalled => "related_packages.installed_package",
      Self::RelatedRunning => "related_packages.running_package",
      Self::SelinuxPolicy => "selinux.policy_package",
    }
  }

  /// A mandatory reference that fails to resolve aborts the ingest.
  pub fn is_mandatory(self) -> bool {
    matches!(self, Self::Installed | Self::RelatedInstalled)
  }
}

impl fmt::Display for PackageRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPackage {
  pub role: PackageRole,
  pub id: i64,
}

/// `None` when the catalog has no package with exactly this NEVRA.
pub async fn resolve(
  conn: &mut SqliteConnection,
  opsysrelease_id: i64,
  pkg: &PackageRef,
) -> Result<Option<PackageRow>, sqlx::Error> {
  query::find_package(conn, opsysrelease_id, pkg).await
}

/// Resolve by role: mandatory misses fail, optional misses become `None`.
pub async fn resolve_role(
  conn: &mut SqliteConnection,
  opsysrelease_id: i64,
  pkg: &PackageRef,
  role: PackageRole,
) -> Result<Option<PackageRow>, IngestError> {
  match resolve(conn, opsysrelease_id, pkg).await? {
    Some(row) => Ok(Some(row)),
    None if role.is_mandatory() => Err(IngestError::unknown_package(role.as_str(), pkg.to_string())),
    None => {
      debug!(role = role.as_str(), package = %pkg, "optional package not in catalog, skipped");
      Ok(None)
    }
  }
}

/// Every package reference of a report except the installed package, which
/// is resolved up front because it decides the component.
pub async fn resolve_secondary(
  conn: &mut SqliteConnection,
  opsysrelease_id: i64,
  report: &UReport,
) -> Result<Vec<ResolvedPackage>, IngestError> {
  let mut refs: Vec<(PackageRole, &PackageRef)> = Vec::new();
  if let Some(running) = &report.running_package {
    refs.push((PackageRole::Running, running));
  }
  for related in &report.related_packages {
    refs.push((PackageRole::RelatedInstalled, &related.installed_package));
    if let Some(running) = &related.running_package {
      refs.push((PackageRole::RelatedRunning, running));
    }
  }
  if let Some(policy) = report.selinux.as_ref().and_then(|s| s.policy_package.as_ref()) {
    refs.push((PackageRole::SelinuxPolicy, policy));
  }

  let mut resolved = Vec::with_capacity(refs.len());
  for (role, pkg) in refs {
    if let Some(row) = resolve_role(conn, opsysrelease_id, pkg, role).await? {
      resolved.push(ResolvedPackage { role, id: row.id });
    }
  }
  Ok(resolved)
}
