//! Report creation and incremental rollups: occurrence counters, per-dimension
//! stat rows and day/week/month history buckets.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, warn};

use crate::config::ProblemSettings;
use crate::error::IngestError;
use crate::interner::{self, PendingArena, SourceSpec};
use crate::matcher::OPSYSRELEASE_DIMENSION;
use crate::problem::ProblemType;
use crate::resolver::{PackageRole, ResolvedPackage};
use crate::signature::NormalizedThread;
use crate::store::query;
use crate::types::{Signature, UReport};

/// Quality of a backtrace whose crash thread has no frames at all.
pub const EMPTY_BACKTRACE_QUALITY: i64 = -100;

/// One `(dimension, key)` counter attached to a Report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatKey {
  pub dimension: &'static str,
  pub key: String,
}

impl StatKey {
  fn new(dimension: &'static str, key: impl Into<String>) -> Self {
    Self {
      dimension,
      key: key.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
  Day,
  Week,
  Month,
}

impl Granularity {
  pub const ALL: [Granularity; 3] = [Self::Day, Self::Week, Self::Month];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Day => "day",
      Self::Week => "week",
      Self::Month => "month",
    }
  }

  /// First day of the bucket containing `date`. Weeks start on Monday.
  pub fn period_start(self, date: NaiveDate) -> NaiveDate {
    match self {
      Self::Day => date,
      Self::Week => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
      Self::Month => date.with_day(1).unwrap_or(date),
    }
  }
}

/// Decimal order of magnitude of the uptime; `-1` below one second.
pub fn uptime_exp(uptime: i64) -> i64 {
  if uptime < 1 {
    return -1;
  }
  let mut exp = 0;
  let mut rest = uptime;
  while rest >= 10 {
    rest /= 10;
    exp += 1;
  }
  exp
}

/// What is known about one stored frame when the backtrace is created.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo<'a> {
  pub symbol: Option<&'a str>,
  pub has_source_path: bool,
  pub has_line: bool,
}

/// 0 is best; every missing piece of frame information costs one point.
pub fn quality(frames: &[FrameInfo<'_>]) -> i64 {
  if frames.is_empty() {
    return EMPTY_BACKTRACE_QUALITY;
  }
  frames
    .iter()
    .map(|f| {
      let mut q = 0;
      match f.symbol {
        None => q -= 1,
        Some("??") => q -= 1,
        Some(_) => {}
      }
      if !f.has_source_path {
        q -= 1;
      }
      if !f.has_line {
        q -= 1;
      }
      q
    })
    .sum()
}

/// Counters a report contributes to, in a stable order.
pub fn stat_keys(report: &UReport, opsysrelease_id: i64, packages: &[ResolvedPackage]) -> Vec<StatKey> {
  let mut keys = vec![
    StatKey::new("arch", report.architecture.as_str()),
    StatKey::new(OPSYSRELEASE_DIMENSION, opsysrelease_id.to_string()),
    StatKey::new("executable", report.executable.as_str()),
    StatKey::new("uptime", uptime_exp(report.uptime).to_string()),
    StatKey::new("reason", report.reason.as_str()),
  ];

  for pkg in packages {
    let (dimension, key) = match pkg.role {
      PackageRole::Installed => ("package", format!("installed:{}", pkg.id)),
      PackageRole::Running => ("package", format!("running:{}", pkg.id)),
      PackageRole::RelatedInstalled => ("related_package", format!("installed:{}", pkg.id)),
      PackageRole::RelatedRunning => ("related_package", format!("running:{}", pkg.id)),
      PackageRole::SelinuxPolicy => ("selinux_policy_package", pkg.id.to_string()),
    };
    keys.push(StatKey::new(dimension, key));
  }

  if let Some(selinux) = &report.selinux {
    keys.push(StatKey::new("selinux_mode", selinux.mode.to_ascii_uppercase()));
    if let Some(context) = &selinux.context {
      keys.push(StatKey::new("selinux_context", context.as_str()));
    }
  }

  keys
}

/// Everything the aggregation steps need to know about one ingest.
pub struct Occurrence<'a> {
  pub report: &'a UReport,
  pub problem: &'a dyn ProblemType,
  pub settings: &'a ProblemSettings,
  pub at: DateTime<Utc>,
  pub increment: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
  Created(i64),
  /// Another ingest claimed the signature first; the id is the winner.
  Lost(i64),
}

/// Create the Report, its signature row and the crash-thread backtrace.
///
/// Runs inside a savepoint: when the signature turns out to be claimed
/// already, the savepoint is rolled back and the winner is returned instead.
pub async fn create_report(
  conn: &mut SqliteConnection,
  arena: &mut PendingArena,
  signature: &Signature,
  component_id: i64,
  thread: &NormalizedThread<'_>,
  occ: &Occurrence<'_>,
) -> Result<Creation, IngestError> {
  let mut sp = conn.begin().await?;

  let report_type = occ.problem.kind().report_type();
  let report_id =
    query::insert_report(&mut sp, report_type, component_id, occ.at, occ.increment, &occ.report.reason).await?;

  if !query::claim_report_hash(&mut sp, report_id, signature, component_id).await? {
    sp.rollback().await?;
    warn!(hash = %signature.hash, "signature claimed concurrently, falling back to the existing report");
    let ids = query::find_report_ids(conn, signature, component_id).await?;
    return match ids.first() {
      Some(winner) => Ok(Creation::Lost(*winner)),
      None => Err(IngestError::StorageConflict(format!("report hash {}", signature.hash))),
    };
  }

  let mut infos = Vec::with_capacity(thread.frames.len());
  let mut sources = Vec::with_capacity(thread.frames.len());
  for frame in &thread.frames {
    let normalized = occ.problem.normalize_path(&frame.path, occ.settings.normalize);
    let symbol_id = match &frame.funcname {
      Some(name) => Some(interner::intern_symbol(&mut sp, arena, name, &normalized).await?),
      None => None,
    };
    let (source_path, line_number) = occ.problem.source_location(frame);
    let spec = SourceSpec {
      build_id: &frame.buildid,
      path: &frame.path,
      offset: frame.offset,
      hash: frame.funchash.as_deref(),
      source_path: source_path.as_deref(),
      line_number,
    };
    sources.push(interner::intern_symbol_source(&mut sp, arena, spec, symbol_id).await?);
    infos.push(FrameInfo {
      symbol: frame.funcname.as_deref(),
      has_source_path: source_path.is_some(),
      has_line: line_number.is_some(),
    });
  }

  let crashfn = occ.problem.crash_function(&thread.frames);
  let backtrace_id = query::insert_backtrace(&mut sp, report_id, crashfn.as_deref(), quality(&infos)).await?;
  let thread_id = query::insert_thread(&mut sp, backtrace_id, occ.report.crash_thread, true).await?;
  for (idx, ss) in sources.iter().enumerate() {
    query::insert_frame(&mut sp, thread_id, idx as i64 + 1, *ss).await?;
  }

  sp.commit().await?;
  debug!(report_id, backtrace_id, frames = sources.len(), "report created");
  Ok(Creation::Created(report_id))
}

/// Bump the occurrence counter and widen the first/last window.
pub async fn update_report(
  conn: &mut SqliteConnection,
  report_id: i64,
  at: DateTime<Utc>,
  increment: i64,
) -> Result<(), IngestError> {
  let (first, last) = query::report_occurrence(conn, report_id)
    .await?
    .ok_or_else(|| IngestError::StorageConflict(format!("report {report_id} vanished")))?;
  query::update_report_occurrence(conn, report_id, increment, first.min(at), last.max(at)).await?;
  Ok(())
}

pub async fn record_stats(
  conn: &mut SqliteConnection,
  report_id: i64,
  keys: &[StatKey],
  increment: i64,
) -> Result<(), IngestError> {
  for key in keys {
    query::upsert_stat(conn, report_id, key.dimension, &key.key, increment).await?;
  }
  Ok(())
}

/// Count the occurrence in the day, week and month buckets of `at`.
///
/// Without an identity every ingest is unique. With one, the unique counter
/// of a bucket moves only the first time that identity is seen there.
pub async fn record_history(
  conn: &mut SqliteConnection,
  report_id: i64,
  opsysrelease_id: i64,
  at: DateTime<Utc>,
  increment: i64,
  identity: Option<&str>,
) -> Result<(), IngestError> {
  let date = at.date_naive();
  for granularity in Granularity::ALL {
    let period = granularity.period_start(date);
    let unique = match identity {
      None => 1,
      Some(id) => {
        let first_time =
          query::record_identity(conn, report_id, opsysrelease_id, granularity.as_str(), period, id).await?;
        i64::from(first_time)
      }
    };
    query::upsert_history(conn, report_id, opsysrelease_id, granularity.as_str(), period, increment, unique)
      .await?;
  }
  Ok(())
}
