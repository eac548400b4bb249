//! Offline uReport checker: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is a uReport. Output lines are either:
//! - a LintReport (schema valid, crash thread usable for a signature)
//! - an ErrorOutput (parse, schema or normalization failure)
//!
//! Nothing is stored. Processing settings come from the environment
//! (`PROCESSING_HASHFRAMES`, ...).

use std::io::{self, BufRead, Write};

use ureport_engine::engine::lint;
use ureport_engine::types::ErrorOutput;
use ureport_engine::{Config, IngestError};

fn main() {
  let config = match Config::from_env() {
    Ok(c) => c,
    Err(e) => {
      let _ = writeln!(io::stderr(), "ureport-check: {}", e);
      std::process::exit(2);
    }
  };

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "ureport-check: read error: {}", e);
        std::process::exit(1);
      }
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {}", e));
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
        continue;
      }
    };

    match lint(&value, &config) {
      Ok(report) => {
        let _ = serde_json::to_writer(&mut out, &report);
      }
      Err(IngestError::Schema(e)) if !e.path.is_empty() => {
        let _ = serde_json::to_writer(&mut out, &ErrorOutput::new(e.reason).with_field(e.path));
      }
      Err(e) => {
        let _ = serde_json::to_writer(&mut out, &ErrorOutput::new(e.to_string()));
      }
    }
    let _ = writeln!(out);
  }

  let _ = out.flush();
}
