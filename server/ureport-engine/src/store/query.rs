//! SQL for the ingest path. Every function runs on a caller-provided
//! connection so that one ingest can chain them inside a single transaction.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqliteConnection};

use crate::types::{PackageRef, Signature};

#[derive(Debug, Clone)]
pub struct PackageRow {
  pub id: i64,
  pub component_id: i64,
  pub component: String,
}

#[derive(Debug, Clone)]
pub struct BugRow {
  pub url: String,
  pub os_name: Option<String>,
  pub os_version: Option<String>,
}

pub struct NewSymbolSource<'a> {
  pub build_id: &'a str,
  pub path: &'a str,
  pub offset: i64,
  pub hash: Option<&'a str>,
  pub source_path: Option<&'a str>,
  pub line_number: Option<i64>,
  pub symbol_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Catalog (read-only from the ingest path)
// ---------------------------------------------------------------------------

pub async fn find_opsys_release(
  conn: &mut SqliteConnection,
  name: &str,
  version: &str,
) -> Result<Option<i64>, sqlx::Error> {
  let row = sqlx::query(
    "SELECT r.id FROM opsysreleases r JOIN opsys o ON o.id = r.opsys_id
     WHERE o.name = $1 AND r.version = $2",
  )
  .bind(name)
  .bind(version)
  .fetch_optional(&mut *conn)
  .await?;
  row.map(|r| r.try_get("id")).transpose()
}

pub async fn find_arch(conn: &mut SqliteConnection, name: &str) -> Result<Option<i64>, sqlx::Error> {
  let row = sqlx::query("SELECT id FROM archs WHERE name = $1")
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
  row.map(|r| r.try_get("id")).transpose()
}

pub async fn find_package(
  conn: &mut SqliteConnection,
  opsysrelease_id: i64,
  pkg: &PackageRef,
) -> Result<Option<PackageRow>, sqlx::Error> {
  let row = sqlx::query(
    "SELECT p.id, p.component_id, c.name AS component
     FROM packages p
     JOIN archs a ON a.id = p.arch_id
     JOIN components c ON c.id = p.component_id
     WHERE p.opsysrelease_id = $1 AND p.name = $2 AND p.epoch = $3
       AND p.version = $4 AND p.release = $5 AND a.name = $6
     ORDER BY p.id
     LIMIT 1",
  )
  .bind(opsysrelease_id)
  .bind(&pkg.name)
  .bind(pkg.epoch)
  .bind(&pkg.version)
  .bind(&pkg.release)
  .bind(&pkg.architecture)
  .fetch_optional(&mut *conn)
  .await?;

  row
    .map(|r| {
      Ok(PackageRow {
        id: r.try_get("id")?,
        component_id: r.try_get("component_id")?,
        component: r.try_get("component")?,
      })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

pub async fn find_report_ids(
  conn: &mut SqliteConnection,
  signature: &Signature,
  component_id: i64,
) -> Result<Vec<i64>, sqlx::Error> {
  let rows = sqlx::query(
    "SELECT report_id FROM report_hashes
     WHERE hash = $1 AND hash_type = $2 AND component_id = $3
     ORDER BY report_id",
  )
  .bind(&signature.hash)
  .bind(signature.hash_type.as_str())
  .bind(component_id)
  .fetch_all(&mut *conn)
  .await?;
  rows.iter().map(|r| r.try_get("report_id")).collect()
}

pub async fn insert_report(
  conn: &mut SqliteConnection,
  report_type: &str,
  component_id: i64,
  at: DateTime<Utc>,
  count: i64,
  errname: &str,
) -> Result<i64, sqlx::Error> {
  let row = sqlx::query(
    "INSERT INTO reports (type, component_id, first_occurrence, last_occurrence, count, errname)
     VALUES ($1, $2, $3, $3, $4, $5)
     RETURNING id",
  )
  .bind(report_type)
  .bind(component_id)
  .bind(at)
  .bind(count)
  .bind(errname)
  .fetch_one(&mut *conn)
  .await?;
  row.try_get("id")
}

/// Attach the signature to a report. `false` means another report already
/// owns the (hash, type, component) key.
pub async fn claim_report_hash(
  conn: &mut SqliteConnection,
  report_id: i64,
  signature: &Signature,
  component_id: i64,
) -> Result<bool, sqlx::Error> {
  let result = sqlx::query(
    "INSERT INTO report_hashes (report_id, hash, hash_type, component_id)
     VALUES ($1, $2, $3, $4)
     ON CONFLICT (hash, hash_type, component_id) DO NOTHING",
  )
  .bind(report_id)
  .bind(&signature.hash)
  .bind(signature.hash_type.as_str())
  .bind(component_id)
  .execute(&mut *conn)
  .await?;
  Ok(result.rows_affected() == 1)
}

pub async fn report_occurrence(
  conn: &mut SqliteConnection,
  report_id: i64,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, sqlx::Error> {
  let row = sqlx::query("SELECT first_occurrence, last_occurrence FROM reports WHERE id = $1")
    .bind(report_id)
    .fetch_optional(&mut *conn)
    .await?;
  row
    .map(|r| Ok((r.try_get("first_occurrence")?, r.try_get("last_occurrence")?)))
    .transpose()
}

pub async fn update_report_occurrence(
  conn: &mut SqliteConnection,
  report_id: i64,
  increment: i64,
  first: DateTime<Utc>,
  last: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "UPDATE reports
     SET count = count + $1, first_occurrence = $2, last_occurrence = $3
     WHERE id = $4",
  )
  .bind(increment)
  .bind(first)
  .bind(last)
  .bind(report_id)
  .execute(&mut *conn)
  .await?;
  Ok(())
}

pub async fn insert_backtrace(
  conn: &mut SqliteConnection,
  report_id: i64,
  crashfn: Option<&str>,
  quality: i64,
) -> Result<i64, sqlx::Error> {
  let row = sqlx::query(
    "INSERT INTO report_backtraces (report_id, crashfn, quality) VALUES ($1, $2, $3) RETURNING id",
  )
  .bind(report_id)
  .bind(crashfn)
  .bind(quality)
  .fetch_one(&mut *conn)
  .await?;
  row.try_get("id")
}

pub async fn insert_thread(
  conn: &mut SqliteConnection,
  backtrace_id: i64,
  number: i64,
  crashthread: bool,
) -> Result<i64, sqlx::Error> {
  let row = sqlx::query(
    "INSERT INTO report_bt_threads (backtrace_id, number, crashthread) VALUES ($1, $2, $3) RETURNING id",
  )
  .bind(backtrace_id)
  .bind(number)
  .bind(crashthread)
  .fetch_one(&mut *conn)
  .await?;
  row.try_get("id")
}

pub async fn insert_frame(
  conn: &mut SqliteConnection,
  thread_id: i64,
  order: i64,
  symbolsource_id: i64,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "INSERT INTO report_bt_frames (thread_id, frame_order, symbolsource_id) VALUES ($1, $2, $3)",
  )
  .bind(thread_id)
  .bind(order)
  .bind(symbolsource_id)
  .execute(&mut *conn)
  .await?;
  Ok(())
}

pub async fn stat_exists(
  conn: &mut SqliteConnection,
  report_id: i64,
  dimension: &str,
  key: &str,
) -> Result<bool, sqlx::Error> {
  let row = sqlx::query(
    "SELECT 1 AS hit FROM report_stats WHERE report_id = $1 AND dimension = $2 AND key = $3",
  )
  .bind(report_id)
  .bind(dimension)
  .bind(key)
  .fetch_optional(&mut *conn)
  .await?;
  Ok(row.is_some())
}

pub async fn upsert_stat(
  conn: &mut SqliteConnection,
  report_id: i64,
  dimension: &str,
  key: &str,
  increment: i64,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "INSERT INTO report_stats (report_id, dimension, key, count)
     VALUES ($1, $2, $3, $4)
     ON CONFLICT (report_id, dimension, key) DO UPDATE SET
       count = report_stats.count + excluded.count",
  )
  .bind(report_id)
  .bind(dimension)
  .bind(key)
  .bind(increment)
  .execute(&mut *conn)
  .await?;
  Ok(())
}

pub async fn upsert_history(
  conn: &mut SqliteConnection,
  report_id: i64,
  opsysrelease_id: i64,
  granularity: &str,
  period: NaiveDate,
  increment: i64,
  unique_increment: i64,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "INSERT INTO report_history (report_id, opsysrelease_id, granularity, period, count, unique_count)
     VALUES ($1, $2, $3, $4, $5, $6)
     ON CONFLICT (report_id, opsysrelease_id, granularity, period) DO UPDATE SET
       count = report_history.count + excluded.count,
       unique_count = report_history.unique_count + excluded.unique_count",
  )
  .bind(report_id)
  .bind(opsysrelease_id)
  .bind(granularity)
  .bind(period)
  .bind(increment)
  .bind(unique_increment)
  .execute(&mut *conn)
  .await?;
  Ok(())
}

/// Remember `identity` for a history bucket; `true` the first time.
pub async fn record_identity(
  conn: &mut SqliteConnection,
  report_id: i64,
  opsysrelease_id: i64,
  granularity: &str,
  period: NaiveDate,
  identity: &str,
) -> Result<bool, sqlx::Error> {
  let result = sqlx::query(
    "INSERT INTO history_identities (report_id, opsysrelease_id, granularity, period, identity)
     VALUES ($1, $2, $3, $4, $5)
     ON CONFLICT DO NOTHING",
  )
  .bind(report_id)
  .bind(opsysrelease_id)
  .bind(granularity)
  .bind(period)
  .bind(identity)
  .execute(&mut *conn)
  .await?;
  Ok(result.rows_affected() == 1)
}

pub async fn bugs_for_report(
  conn: &mut SqliteConnection,
  report_id: i64,
) -> Result<Vec<BugRow>, sqlx::Error> {
  let rows = sqlx::query(
    "SELECT b.url, o.name AS os_name, r.version AS os_version
     FROM report_bugs b
     LEFT JOIN opsysreleases r ON r.id = b.opsysrelease_id
     LEFT JOIN opsys o ON o.id = r.opsys_id
     WHERE b.report_id = $1
     ORDER BY b.url",
  )
  .bind(report_id)
  .fetch_all(&mut *conn)
  .await?;
  rows
    .iter()
    .map(|r| {
      Ok(BugRow {
        url: r.try_get("url")?,
        os_name: r.try_get("os_name")?,
        os_version: r.try_get("os_version")?,
      })
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

pub async fn find_symbol(
  conn: &mut SqliteConnection,
  name: &str,
  normalized_path: &str,
) -> Result<Option<i64>, sqlx::Error> {
  let row = sqlx::query("SELECT id FROM symbols WHERE name = $1 AND normalized_path = $2")
    .bind(name)
    .bind(normalized_path)
    .fetch_optional(&mut *conn)
    .await?;
  row.map(|r| r.try_get("id")).transpose()
}

/// `None` when a concurrent writer created the same symbol first.
pub async fn insert_symbol(
  conn: &mut SqliteConnection,
  name: &str,
  normalized_path: &str,
) -> Result<Option<i64>, sqlx::Error> {
  let row = sqlx::query(
    "INSERT INTO symbols (name, normalized_path) VALUES ($1, $2)
     ON CONFLICT (name, normalized_path) DO NOTHING
     RETURNING id",
  )
  .bind(name)
  .bind(normalized_path)
  .fetch_optional(&mut *conn)
  .await?;
  row.map(|r| r.try_get("id")).transpose()
}

pub async fn find_symbolsource(
  conn: &mut SqliteConnection,
  build_id: &str,
  path: &str,
  offset: i64,
) -> Result<Option<i64>, sqlx::Error> {
  let row = sqlx::query(
    "SELECT id FROM symbolsources WHERE build_id = $1 AND path = $2 AND bin_offset = $3",
  )
  .bind(build_id)
  .bind(path)
  .bind(offset)
  .fetch_optional(&mut *conn)
  .await?;
  row.map(|r| r.try_get("id")).transpose()
}

/// `None` when a concurrent writer created the same symbol source first.
pub async fn insert_symbolsource(
  conn: &mut SqliteConnection,
  ss: &NewSymbolSource<'_>,
) -> Result<Option<i64>, sqlx::Error> {
  let row = sqlx::query(
    "INSERT INTO symbolsources (build_id, path, bin_offset, hash, source_path, line_number, symbol_id)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT (build_id, path, bin_offset) DO NOTHING
     RETURNING id",
  )
  .bind(ss.build_id)
  .bind(ss.path)
  .bind(ss.offset)
  .bind(ss.hash)
  .bind(ss.source_path)
  .bind(ss.line_number)
  .bind(ss.symbol_id)
  .fetch_optional(&mut *conn)
  .await?;
  row.map(|r| r.try_get("id")).transpose()
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

pub async fn insert_invalid_ureport(
  conn: &mut SqliteConnection,
  errormsg: &str,
  reporter: Option<&str>,
  received_at: DateTime<Utc>,
  payload: &str,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "INSERT INTO invalid_ureports (errormsg, reporter, received_at, payload) VALUES ($1, $2, $3, $4)",
  )
  .bind(errormsg)
  .bind(reporter)
  .bind(received_at)
  .bind(payload)
  .execute(&mut *conn)
  .await?;
  Ok(())
}

pub async fn bump_unknown_opsys(
  conn: &mut SqliteConnection,
  name: &str,
  version: &str,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "INSERT INTO unknown_opsys (name, version, count) VALUES ($1, $2, 1)
     ON CONFLICT (name, version) DO UPDATE SET count = unknown_opsys.count + 1",
  )
  .bind(name)
  .bind(version)
  .execute(&mut *conn)
  .await?;
  Ok(())
}
