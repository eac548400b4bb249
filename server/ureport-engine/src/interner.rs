//! Symbol and symbol-source interning.
//!
//! Lookups go through two tiers: the [`PendingArena`] of entities this ingest
//! already resolved, then the durable tables. The arena belongs to one ingest
//! transaction and is dropped with it, so a rolled-back ingest leaves nothing
//! behind in either tier.

use std::collections::HashMap;

use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::IngestError;
use crate::store::query::{self, NewSymbolSource};

type SymbolKey = (String, String);
type SourceKey = (String, String, i64);

/// Per-transaction map from natural key to row id.
#[derive(Debug, Default)]
pub struct PendingArena {
  symbols: HashMap<SymbolKey, i64>,
  sources: HashMap<SourceKey, i64>,
  created_symbols: usize,
  created_sources: usize,
}

impl PendingArena {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rows inserted by this ingest: (symbols, symbol sources).
  pub fn created(&self) -> (usize, usize) {
    (self.created_symbols, self.created_sources)
  }
}

/// Location data of a frame as it will be stored on a new symbol source.
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec<'a> {
  pub build_id: &'a str,
  pub path: &'a str,
  pub offset: i64,
  pub hash: Option<&'a str>,
  pub source_path: Option<&'a str>,
  pub line_number: Option<i64>,
}

pub async fn intern_symbol(
  conn: &mut SqliteConnection,
  arena: &mut PendingArena,
  name: &str,
  normalized_path: &str,
) -> Result<i64, IngestError> {
  let key = (name.to_string(), normalized_path.to_string());
  if let Some(id) = arena.symbols.get(&key) {
    return Ok(*id);
  }

  let id = match query::find_symbol(conn, name, normalized_path).await? {
    Some(id) => id,
    None => match query::insert_symbol(conn, name, normalized_path).await? {
      Some(id) => {
        arena.created_symbols += 1;
        id
      }
      None => {
        warn!(name, normalized_path, "symbol insert lost a race, re-resolving");
        query::find_symbol(conn, name, normalized_path)
          .await?
          .ok_or_else(|| IngestError::StorageConflict(format!("symbol {name} @ {normalized_path}")))?
      }
    },
  };

  arena.symbols.insert(key, id);
  Ok(id)
}

/// Resolve a symbol source by `(build_id, path, offset)`. An existing row is
/// returned as-is; `symbol_id` and the source location only apply on creation.
pub async fn intern_symbol_source(
  conn: &mut SqliteConnection,
  arena: &mut PendingArena,
  spec: SourceSpec<'_>,
  symbol_id: Option<i64>,
) -> Result<i64, IngestError> {
  let key = (spec.build_id.to_string(), spec.path.to_string(), spec.offset);
  if let Some(id) = arena.sources.get(&key) {
    return Ok(*id);
  }

  let id = match query::find_symbolsource(conn, spec.build_id, spec.path, spec.offset).await? {
    Some(id) => id,
    None => {
      let new = NewSymbolSource {
        build_id: spec.build_id,
        path: spec.path,
        offset: spec.offset,
        hash: spec.hash,
        source_path: spec.source_path,
        line_number: spec.line_number,
        symbol_id,
      };
      match query::insert_symbolsource(conn, &new).await? {
        Some(id) => {
          arena.created_sources += 1;
          id
        }
        None => {
          warn!(build_id = spec.build_id, path = spec.path, offset = spec.offset, "symbol source insert lost a race, re-resolving");
          query::find_symbolsource(conn, spec.build_id, spec.path, spec.offset)
            .await?
            .ok_or_else(|| {
              IngestError::StorageConflict(format!(
                "symbol source {}:{}+{}",
                spec.build_id, spec.path, spec.offset
              ))
            })?
        }
      }
    }
  };

  arena.sources.insert(key, id);
  Ok(id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Store;

  fn spec(offset: i64) -> SourceSpec<'static> {
    SourceSpec {
      build_id: "f76f656ab6e1b558fc78d0496f1960071565b0aa",
      path: "/usr/lib64/libc.so.6",
      offset,
      hash: None,
      source_path: None,
      line_number: None,
    }
  }

  #[tokio::test]
  async fn recursive_stack_creates_one_row_per_key() {
    let store = Store::in_memory().await.unwrap();
    let mut tx = store.begin().await.unwrap();
    let mut arena = PendingArena::new();

    let mut ids = Vec::new();
    for _ in 0..5 {
      let sym = intern_symbol(&mut tx, &mut arena, "recurse", "libc.so").await.unwrap();
      let ss = intern_symbol_source(&mut tx, &mut arena, spec(0x40), Some(sym)).await.unwrap();
      ids.push((sym, ss));
    }
    tx.commit().await.unwrap();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(arena.created(), (1, 1));
    assert_eq!(store.symbol_counts().await.unwrap(), (1, 1));
  }

  #[tokio::test]
  async fn committed_rows_are_reused_by_later_ingests() {
    let store = Store::in_memory().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut first = PendingArena::new();
    let a = intern_symbol(&mut tx, &mut first, "main", "will_crash").await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut second = PendingArena::new();
    let b = intern_symbol(&mut tx, &mut second, "main", "will_crash").await.unwrap();
    let c = intern_symbol(&mut tx, &mut second, "main", "bash").await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(second.created(), (1, 0));
  }

  #[tokio::test]
  async fn rollback_discards_pending_rows() {
    let store = Store::in_memory().await.unwrap();
    {
      let mut tx = store.begin().await.unwrap();
      let mut arena = PendingArena::new();
      intern_symbol(&mut tx, &mut arena, "main", "will_crash").await.unwrap();
      intern_symbol_source(&mut tx, &mut arena, spec(1), None).await.unwrap();
      tx.rollback().await.unwrap();
    }
    assert_eq!(store.symbol_counts().await.unwrap(), (0, 0));
  }

  #[tokio::test]
  async fn distinct_offsets_are_distinct_sources() {
    let store = Store::in_memory().await.unwrap();
    let mut tx = store.begin().await.unwrap();
    let mut arena = PendingArena::new();
    let a = intern_symbol_source(&mut tx, &mut arena, spec(1), None).await.unwrap();
    let b = intern_symbol_source(&mut tx, &mut arena, spec(2), None).await.unwrap();
    tx.commit().await.unwrap();
    assert_ne!(a, b);
  }
}
