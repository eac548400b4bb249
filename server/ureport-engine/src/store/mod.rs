//! SQLite-backed aggregate store.
//!
//! The pool is limited to one connection: SQLite serializes writers anyway,
//! and a single connection turns concurrent ingests into a queue instead of
//! `database is locked` failures.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::types::{OsRef, PackageRef};

pub mod query;
mod schema;

/// Persistent state of one Report as seen by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
  pub id: i64,
  pub report_type: String,
  pub component: String,
  pub first_occurrence: DateTime<Utc>,
  pub last_occurrence: DateTime<Utc>,
  pub count: i64,
  pub errname: Option<String>,
  pub archived: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
  pub count: i64,
  pub unique_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktraceRow {
  pub id: i64,
  pub crashfn: Option<String>,
  pub quality: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
  pub order: i64,
  pub symbolsource_id: i64,
  pub build_id: String,
  pub path: String,
  pub offset: i64,
  pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidUReportRow {
  pub errormsg: String,
  pub reporter: Option<String>,
  pub payload: String,
}

pub struct Store {
  pool: SqlitePool,
}

impl Store {
  /// Open (creating if missing) a database file, e.g. `sqlite://ureports.db`.
  pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .foreign_keys(true)
      .busy_timeout(Duration::from_secs(5));
    Self::connect(opts).await
  }

  /// Private in-memory database, mostly for tests and dry runs.
  pub async fn in_memory() -> Result<Self, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    Self::connect(opts).await
  }

  async fn connect(opts: SqliteConnectOptions) -> Result<Self, sqlx::Error> {
    // An in-memory database lives as long as its connection: never recycle it.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(opts)
      .await?;
    let store = Self { pool };
    store.run_migrations().await?;
    Ok(store)
  }

  async fn run_migrations(&self) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(schema::SCHEMA).execute(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }

  pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    self.pool.begin().await
  }

  /// Write access to the catalog tables the ingest path only reads.
  pub fn catalog(&self) -> Catalog<'_> {
    Catalog { pool: &self.pool }
  }

  pub async fn report(&self, id: i64) -> Result<Option<ReportRow>, sqlx::Error> {
    let row = sqlx::query(
      "SELECT r.id, r.type, c.name AS component, r.first_occurrence, r.last_occurrence,
              r.count, r.errname, r.archived
       FROM reports r JOIN components c ON c.id = r.component_id
       WHERE r.id = $1",
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(|r| {
        Ok(ReportRow {
          id: r.try_get("id")?,
          report_type: r.try_get("type")?,
          component: r.try_get("component")?,
          first_occurrence: r.try_get("first_occurrence")?,
          last_occurrence: r.try_get("last_occurrence")?,
          count: r.try_get("count")?,
          errname: r.try_get("errname")?,
          archived: r.try_get("archived")?,
        })
      })
      .transpose()
  }

  pub async fn report_count(&self) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM reports")
      .fetch_one(&self.pool)
      .await?;
    row.try_get("n")
  }

  pub async fn stat_count(
    &self,
    report_id: i64,
    dimension: &str,
    key: &str,
  ) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query(
      "SELECT count FROM report_stats WHERE report_id = $1 AND dimension = $2 AND key = $3",
    )
    .bind(report_id)
    .bind(dimension)
    .bind(key)
    .fetch_optional(&self.pool)
    .await?;
    row.map(|r| r.try_get("count")).transpose()
  }

  /// Keys recorded for a dimension, sorted.
  pub async fn stat_keys(&self, report_id: i64, dimension: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
      "SELECT key FROM report_stats WHERE report_id = $1 AND dimension = $2 ORDER BY key",
    )
    .bind(report_id)
    .bind(dimension)
    .fetch_all(&self.pool)
    .await?;
    rows.iter().map(|r| r.try_get("key")).collect()
  }

  /// History bucket of a report, summed over OS releases.
  pub async fn history(
    &self,
    report_id: i64,
    granularity: &str,
    period: NaiveDate,
  ) -> Result<Option<HistoryRow>, sqlx::Error> {
    let rows = sqlx::query(
      "SELECT count, unique_count FROM report_history
       WHERE report_id = $1 AND granularity = $2 AND period = $3",
    )
    .bind(report_id)
    .bind(granularity)
    .bind(period)
    .fetch_all(&self.pool)
    .await?;
    if rows.is_empty() {
      return Ok(None);
    }
    let mut total = HistoryRow {
      count: 0,
      unique_count: 0,
    };
    for r in &rows {
      total.count += r.try_get::<i64, _>("count")?;
      total.unique_count += r.try_get::<i64, _>("unique_count")?;
    }
    Ok(Some(total))
  }

  pub async fn backtraces(&self, report_id: i64) -> Result<Vec<BacktraceRow>, sqlx::Error> {
    let rows = sqlx::query(
      "SELECT id, crashfn, quality FROM report_backtraces WHERE report_id = $1 ORDER BY id",
    )
    .bind(report_id)
    .fetch_all(&self.pool)
    .await?;
    rows
      .iter()
      .map(|r| {
        Ok(BacktraceRow {
          id: r.try_get("id")?,
          crashfn: r.try_get("crashfn")?,
          quality: r.try_get("quality")?,
        })
      })
      .collect()
  }

  /// Frames of the crash thread of a backtrace, in order.
  pub async fn crash_frames(&self, backtrace_id: i64) -> Result<Vec<FrameRow>, sqlx::Error> {
    let rows = sqlx::query(
      "SELECT f.frame_order, f.symbolsource_id, ss.build_id, ss.path, ss.bin_offset, s.name AS symbol
       FROM report_bt_threads t
       JOIN report_bt_frames f ON f.thread_id = t.id
       JOIN symbolsources ss ON ss.id = f.symbolsource_id
       LEFT JOIN symbols s ON s.id = ss.symbol_id
       WHERE t.backtrace_id = $1 AND t.crashthread = 1
       ORDER BY f.frame_order",
    )
    .bind(backtrace_id)
    .fetch_all(&self.pool)
    .await?;
    rows
      .iter()
      .map(|r| {
        Ok(FrameRow {
          order: r.try_get("frame_order")?,
          symbolsource_id: r.try_get("symbolsource_id")?,
          build_id: r.try_get("build_id")?,
          path: r.try_get("path")?,
          offset: r.try_get("bin_offset")?,
          symbol: r.try_get("symbol")?,
        })
      })
      .collect()
  }

  /// Row counts of the symbol tables: (symbols, symbol sources).
  pub async fn symbol_counts(&self) -> Result<(i64, i64), sqlx::Error> {
    let row = sqlx::query(
      "SELECT (SELECT COUNT(*) FROM symbols) AS symbols,
              (SELECT COUNT(*) FROM symbolsources) AS sources",
    )
    .fetch_one(&self.pool)
    .await?;
    Ok((row.try_get("symbols")?, row.try_get("sources")?))
  }

  pub async fn invalid_ureports(&self) -> Result<Vec<InvalidUReportRow>, sqlx::Error> {
    let rows = sqlx::query("SELECT errormsg, reporter, payload FROM invalid_ureports ORDER BY id")
      .fetch_all(&self.pool)
      .await?;
    rows
      .iter()
      .map(|r| {
        Ok(InvalidUReportRow {
          errormsg: r.try_get("errormsg")?,
          reporter: r.try_get("reporter")?,
          payload: r.try_get("payload")?,
        })
      })
      .collect()
  }

  pub async fn unknown_opsys_count(&self, name: &str, version: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT count FROM unknown_opsys WHERE name = $1 AND version = $2")
      .bind(name)
      .bind(version)
      .fetch_optional(&self.pool)
      .await?;
    row.map(|r| r.try_get("count")).transpose().map(|c| c.unwrap_or(0))
  }

  /// Flag a report as archived. Reports are never deleted.
  pub async fn set_archived(&self, report_id: i64, archived: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE reports SET archived = $1 WHERE id = $2")
      .bind(archived)
      .bind(report_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

/// Seeding API for the package / OS catalog and bug associations.
pub struct Catalog<'a> {
  pool: &'a SqlitePool,
}

impl Catalog<'_> {
  pub async fn add_opsys_release(&self, name: &str, version: &str) -> Result<i64, sqlx::Error> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("INSERT INTO opsys (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
      .bind(name)
      .execute(&mut *tx)
      .await?;
    sqlx::query(
      "INSERT INTO opsysreleases (opsys_id, version)
       SELECT id, $2 FROM opsys WHERE name = $1
       ON CONFLICT (opsys_id, version) DO NOTHING",
    )
    .bind(name)
    .bind(version)
    .execute(&mut *tx)
    .await?;
    let id = query::find_opsys_release(&mut tx, name, version)
      .await?
      .ok_or(sqlx::Error::RowNotFound)?;
    tx.commit().await?;
    Ok(id)
  }

  pub async fn add_arch(&self, name: &str) -> Result<i64, sqlx::Error> {
    get_or_create_named(self.pool, "archs", name).await
  }

  pub async fn add_component(&self, name: &str) -> Result<i64, sqlx::Error> {
    get_or_create_named(self.pool, "components", name).await
  }

  /// Register a package built from `component` for an OS release. The OS
  /// release and architecture are created when missing.
  pub async fn add_package(
    &self,
    os: &OsRef,
    component: &str,
    pkg: &PackageRef,
  ) -> Result<i64, sqlx::Error> {
    let osr_id = self.add_opsys_release(&os.name, &os.version).await?;
    let arch_id = self.add_arch(&pkg.architecture).await?;
    let component_id = self.add_component(component).await?;

    sqlx::query(
      "INSERT INTO packages (opsysrelease_id, component_id, arch_id, name, epoch, version, release)
       VALUES ($1, $2, $3, $4, $5, $6, $7)
       ON CONFLICT (opsysrelease_id, name, epoch, version, release, arch_id) DO NOTHING",
    )
    .bind(osr_id)
    .bind(component_id)
    .bind(arch_id)
    .bind(&pkg.name)
    .bind(pkg.epoch)
    .bind(&pkg.version)
    .bind(&pkg.release)
    .execute(self.pool)
    .await?;

    let mut conn = self.pool.acquire().await?;
    let row = query::find_package(&mut conn, osr_id, pkg)
      .await?
      .ok_or(sqlx::Error::RowNotFound)?;
    Ok(row.id)
  }

  /// Link a bug to a report, optionally tagged with the OS release it was filed against.
  pub async fn associate_bug(
    &self,
    report_id: i64,
    url: &str,
    os: Option<&OsRef>,
  ) -> Result<(), sqlx::Error> {
    let osr_id = match os {
      Some(os) => Some(self.add_opsys_release(&os.name, &os.version).await?),
      None => None,
    };
    sqlx::query(
      "INSERT INTO report_bugs (report_id, url, opsysrelease_id) VALUES ($1, $2, $3)
       ON CONFLICT (report_id, url) DO UPDATE SET opsysrelease_id = excluded.opsysrelease_id",
    )
    .bind(report_id)
    .bind(url)
    .bind(osr_id)
    .execute(self.pool)
    .await?;
    Ok(())
  }
}

async fn get_or_create_named(pool: &SqlitePool, table: &str, name: &str) -> Result<i64, sqlx::Error> {
  sqlx::query(&format!(
    "INSERT INTO {table} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING"
  ))
  .bind(name)
  .execute(pool)
  .await?;
  let row = sqlx::query(&format!("SELECT id FROM {table} WHERE name = $1"))
    .bind(name)
    .fetch_one(pool)
    .await?;
  row.try_get("id")
}
