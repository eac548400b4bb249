//! Ingest pipeline: validate, normalize, resolve, match, aggregate.
//!
//! One ingest is one transaction. Validation and normalization failures never
//! open it; they are archived in `invalid_ureports` together with the payload.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, error, info, warn};

use crate::aggregate::{self, Creation, Occurrence};
use crate::config::Config;
use crate::error::{IngestError, SchemaError};
use crate::interner::PendingArena;
use crate::matcher::{self, MatchResult};
use crate::problem;
use crate::resolver::{self, PackageRole, ResolvedPackage};
use crate::schema;
use crate::signature::{self, NormalizedThread};
use crate::store::query::{self, PackageRow};
use crate::store::Store;
use crate::types::*;

/// A report that passed the schema and its problem type's own checks.
#[derive(Debug)]
pub struct CheckedReport {
  pub report: UReport,
  pub kind: ProblemKind,
}

/// Offline summary of a report, no storage involved.
#[derive(Debug, Clone, Serialize)]
pub struct LintReport {
  #[serde(rename = "type")]
  pub kind: ProblemKind,
  pub hash_type: HashType,
  pub crash_thread_frames: usize,
  pub hashed_frames: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub crash_function: Option<String>,
}

/// Validate and deserialize a raw uReport value.
pub fn check_report(value: &Value) -> Result<CheckedReport, SchemaError> {
  schema::validate_ureport(value)?;
  let report: UReport = serde_json::from_value(value.clone()).map_err(|e| SchemaError::new(e.to_string()))?;
  let kind = ProblemKind::from_str_loose(&report.problem_type)
    .ok_or_else(|| SchemaError::new(format!("unknown problem type {:?}", report.problem_type)).in_field("type"))?;
  problem::for_kind(kind).check(&report)?;
  Ok(CheckedReport { report, kind })
}

/// Schema check plus crash-thread normalization.
pub fn lint(value: &Value, config: &Config) -> Result<LintReport, IngestError> {
  let checked = check_report(value)?;
  let problem = problem::for_kind(checked.kind);
  let thread = signature::normalize(&checked.report, problem.settings(config).hash_frames)?;
  Ok(LintReport {
    kind: checked.kind,
    hash_type: thread.strategy,
    crash_thread_frames: thread.frames.len(),
    hashed_frames: thread.hashed,
    crash_function: problem.crash_function(&thread.frames),
  })
}

/// `"name version"` of the submitting client, if the payload has one.
fn reporter_of(value: &Value) -> Option<String> {
  let reporter = value.get("reporter")?;
  let name = reporter.get("name")?.as_str()?;
  let version = reporter.get("version").and_then(Value::as_str).unwrap_or_default();
  Some(format!("{} {}", name, version).trim_end().to_string())
}

pub struct Engine {
  store: Store,
  config: Config,
}

impl Engine {
  pub fn new(store: Store, config: Config) -> Self {
    Self { store, config }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Ingest a raw JSON payload.
  pub async fn ingest_raw(&self, raw: &str, opts: IngestOptions) -> Result<IngestOutcome, IngestError> {
    let max = self.config.max_ureport_length;
    if raw.len() > max {
      return Err(IngestError::PayloadTooLarge { len: raw.len(), max });
    }
    let value: Value = match serde_json::from_str(raw) {
      Ok(v) => v,
      Err(e) => {
        let err = IngestError::Schema(SchemaError::new(format!("invalid JSON: {}", e)));
        self.archive(raw, None, &err).await;
        return Err(err);
      }
    };
    self.run(&value, raw, opts).await
  }

  /// Ingest an already parsed payload.
  pub async fn ingest(&self, value: &Value, opts: IngestOptions) -> Result<IngestOutcome, IngestError> {
    self.run(value, &value.to_string(), opts).await
  }

  /// Dry run: compute the signature and answer whether it is known.
  /// Nothing is written, not even the unknown-OS counter.
  pub async fn check_known(&self, value: &Value) -> Result<KnownCheck, IngestError> {
    let checked = check_report(value)?;
    let problem = problem::for_kind(checked.kind);
    let thread = signature::normalize(&checked.report, problem.settings(&self.config).hash_frames)?;

    let mut conn = self.store.pool().acquire().await?;
    let report = &checked.report;
    let osr_id = query::find_opsys_release(&mut conn, &report.os.name, &report.os.version)
      .await?
      .ok_or_else(|| unknown_release(report))?;
    let installed = self.resolve_installed(&mut conn, osr_id, report).await?;
    let sig = signature::compute(&thread, problem, &installed.component);

    let m = self.match_signature(&mut conn, &sig, &installed, osr_id, report).await?;
    Ok(KnownCheck {
      known: m.known,
      signature: sig,
      report_id: m.report,
    })
  }

  async fn run(&self, value: &Value, payload: &str, opts: IngestOptions) -> Result<IngestOutcome, IngestError> {
    let checked = match check_report(value) {
      Ok(c) => c,
      Err(e) => {
        let err = IngestError::Schema(e);
        self.archive(payload, reporter_of(value), &err).await;
        return Err(err);
      }
    };
    let report = &checked.report;
    let problem = problem::for_kind(checked.kind);
    let settings = problem.settings(&self.config);
    debug!(kind = checked.kind.as_str(), "report validated");

    let thread = match signature::normalize(report, settings.hash_frames) {
      Ok(t) => t,
      Err(e) => {
        self.archive(payload, reporter_of(value), &e).await;
        return Err(e);
      }
    };
    debug!(strategy = thread.strategy.as_str(), frames = thread.frames.len(), "crash thread normalized");

    let mut conn = self.store.pool().acquire().await?;

    let osr_id = match query::find_opsys_release(&mut conn, &report.os.name, &report.os.version).await? {
      Some(id) => id,
      None => {
        query::bump_unknown_opsys(&mut conn, &report.os.name, &report.os.version).await?;
        return Err(unknown_release(report));
      }
    };
    if query::find_arch(&mut conn, &report.architecture).await?.is_none() {
      return Err(IngestError::UnknownArchitecture(report.architecture.clone()));
    }
    let installed = self.resolve_installed(&mut conn, osr_id, report).await?;
    let sig = signature::compute(&thread, problem, &installed.component);
    debug!(hash = %sig.hash, component = %installed.component, "signature computed");

    let at = opts.received_at.unwrap_or_else(Utc::now);
    let increment = opts.increment();
    let occ = Occurrence {
      report,
      problem,
      settings,
      at,
      increment,
    };

    let mut attempt = 0;
    loop {
      attempt += 1;
      match self.store_occurrence(&mut conn, &sig, &installed, osr_id, &thread, &occ, &opts).await {
        Err(e) if attempt < 2 && is_contention(&e) => {
          warn!(error = %e, hash = %sig.hash, "ingest collided with a concurrent writer, retrying");
        }
        result => return result,
      }
    }
  }

  /// Match, create or update, aggregate: one `BEGIN IMMEDIATE` transaction.
  #[allow(clippy::too_many_arguments)]
  async fn store_occurrence(
    &self,
    conn: &mut SqliteConnection,
    sig: &Signature,
    installed: &PackageRow,
    osr_id: i64,
    thread: &NormalizedThread<'_>,
    occ: &Occurrence<'_>,
    opts: &IngestOptions,
  ) -> Result<IngestOutcome, IngestError> {
    let report = occ.report;
    let (at, increment) = (occ.at, occ.increment);
    let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;
    let mut arena = PendingArena::new();

    let m = self.match_signature(&mut tx, sig, installed, osr_id, report).await?;

    let (m, report_id, created) = match m.report {
      Some(id) => {
        aggregate::update_report(&mut tx, id, at, increment).await?;
        (m, id, false)
      }
      None => match aggregate::create_report(&mut tx, &mut arena, sig, installed.component_id, thread, occ).await? {
        Creation::Created(id) => (m, id, true),
        Creation::Lost(winner) => {
          // The winner is an ordinary match now; the policy decides `known`.
          let m = self.match_signature(&mut tx, sig, installed, osr_id, report).await?;
          let id = m.report.unwrap_or(winner);
          aggregate::update_report(&mut tx, id, at, increment).await?;
          (m, id, false)
        }
      },
    };

    let mut packages = vec![ResolvedPackage {
      role: PackageRole::Installed,
      id: installed.id,
    }];
    packages.extend(resolver::resolve_secondary(&mut tx, osr_id, report).await?);

    let keys = aggregate::stat_keys(report, osr_id, &packages);
    aggregate::record_stats(&mut tx, report_id, &keys, increment).await?;
    aggregate::record_history(&mut tx, report_id, osr_id, at, increment, opts.identity.as_deref()).await?;

    let bug_urls = if m.known {
      query::bugs_for_report(&mut tx, report_id)
        .await?
        .into_iter()
        .map(|b| b.url)
        .collect()
    } else {
      Vec::new()
    };

    tx.commit().await?;

    if created {
      let (symbols, sources) = arena.created();
      info!(report_id, hash = %sig.hash, component = %installed.component, symbols, sources, "new report");
    } else {
      debug!(report_id, known = m.known, "report updated");
    }

    Ok(IngestOutcome {
      known: m.known,
      signature: sig.clone(),
      report_id,
      created,
      bug_urls,
    })
  }

  async fn match_signature(
    &self,
    conn: &mut SqliteConnection,
    sig: &Signature,
    installed: &PackageRow,
    osr_id: i64,
    report: &UReport,
  ) -> Result<MatchResult, IngestError> {
    let m = matcher::match_report(
      conn,
      sig,
      installed.component_id,
      osr_id,
      &report.os,
      self.config.known_policy,
    )
    .await?;
    Ok(m)
  }

  async fn resolve_installed(
    &self,
    conn: &mut SqliteConnection,
    osr_id: i64,
    report: &UReport,
  ) -> Result<PackageRow, IngestError> {
    let pkg = &report.installed_package;
    resolver::resolve(conn, osr_id, pkg)
      .await?
      .ok_or_else(|| IngestError::unknown_package(PackageRole::Installed.as_str(), pkg.to_string()))
  }

  /// Keep a rejected payload for later inspection. Archive failures are
  /// logged and never replace the rejection error.
  async fn archive(&self, payload: &str, reporter: Option<String>, err: &IngestError) {
    debug!(error = %err, "rejecting report");
    let result = async {
      let mut conn = self.store.pool().acquire().await?;
      query::insert_invalid_ureport(&mut conn, &err.to_string(), reporter.as_deref(), Utc::now(), payload).await
    }
    .await;
    if let Err(e) = result {
      error!(error = %e, "failed to archive invalid report");
    }
  }
}

/// Lock contention with another writer on the same database file, or a
/// natural-key race that survived the in-transaction re-resolution.
fn is_contention(err: &IngestError) -> bool {
  match err {
    IngestError::StorageConflict(_) => true,
    IngestError::Storage(sqlx::Error::Database(db)) => {
      let busy = db
        .code()
        .and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false);
      busy || db.is_unique_violation()
    }
    _ => false,
  }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn unknown_release(report: &UReport) -> IngestError {
  IngestError::UnknownOpSysRelease {
    name: report.os.name.clone(),
    version: report.os.version.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn payload() -> Value {
    json!({
      "type": "python",
      "reason": "TypeError",
      "uptime": 1,
      "executable": "/usr/bin/faf",
      "installed_package": {"name": "faf", "version": "0.12", "release": "1.fc20", "epoch": 0, "architecture": "noarch"},
      "related_packages": [],
      "os": {"name": "Fedora", "version": "20"},
      "architecture": "x86_64",
      "reporter": {"name": "ureport", "version": "0.1"},
      "crash_thread": 0,
      "core_backtrace": [
        {"thread": 0, "frame": 1, "buildid": "e7a8b1c2", "path": "/usr/share/faf/pyfaf/storage/opsys.py", "offset": 31, "funcname": "<module>"},
        {"thread": 0, "frame": 2, "buildid": "e7a8b1c2", "path": "/usr/share/faf/pyfaf/storage/__init__.py", "offset": 73, "funcname": "load"}
      ]
    })
  }

  #[test]
  fn check_report_accepts_mixed_case_type() {
    let mut v = payload();
    v["type"] = json!("Python");
    assert_eq!(check_report(&v).unwrap().kind, ProblemKind::Python);
  }

  #[test]
  fn python_offsets_must_be_lines() {
    let mut v = payload();
    v["core_backtrace"][1]["offset"] = json!(0);
    let err = check_report(&v).unwrap_err();
    assert_eq!(err.path, "core_backtrace[1].offset");
  }

  #[test]
  fn lint_reports_crash_function() {
    let out = lint(&payload(), &Config::default()).unwrap();
    assert_eq!(out.kind, ProblemKind::Python);
    assert_eq!(out.hash_type, HashType::Names);
    assert_eq!(out.crash_thread_frames, 2);
    assert_eq!(out.crash_function.as_deref(), Some("load"));
  }

  #[test]
  fn reporter_is_name_and_version() {
    assert_eq!(reporter_of(&payload()).as_deref(), Some("ureport 0.1"));
    assert_eq!(reporter_of(&json!({"reporter": {"name": "abrt"}})).as_deref(), Some("abrt"));
    assert_eq!(reporter_of(&json!([])), None);
  }

  #[tokio::test]
  async fn unknown_release_is_counted_once_per_submission() {
    let engine = Engine::new(Store::in_memory().await.unwrap(), Config::default());
    for _ in 0..2 {
      let err = engine.ingest(&payload(), IngestOptions::default()).await.unwrap_err();
      assert!(matches!(err, IngestError::UnknownOpSysRelease { .. }));
    }
    assert_eq!(engine.store().unknown_opsys_count("Fedora", "20").await.unwrap(), 2);
    assert_eq!(engine.store().report_count().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn oversized_payload_is_refused_before_parsing() {
    let config = Config {
      max_ureport_length: 8,
      ..Config::default()
    };
    let engine = Engine::new(Store::in_memory().await.unwrap(), config);
    let err = engine.ingest_raw("{\"type\": \"python\"}", IngestOptions::default()).await.unwrap_err();
    assert!(matches!(err, IngestError::PayloadTooLarge { len: 18, max: 8 }));
    assert!(engine.store().invalid_ureports().await.unwrap().is_empty());
  }
}
