//! Crash-thread normalization and the stable signature hash.
//!
//! The signature is blake3 over the newline-joined component name and the
//! formatted frames `"<name-or-hash> @ <path>[ + <line>]"` of the first
//! `hash_frames` crash-thread frames. Identical ordered frame tuples always
//! hash to the identical digest; the component seed keeps identical stacks of
//! different components apart.

use crate::error::IngestError;
use crate::problem::ProblemType;
use crate::types::{CoreFrame, HashType, Signature, UReport};

/// Frames of the declared crash thread, ordered by frame index.
pub fn select_crash_thread(report: &UReport) -> Vec<&CoreFrame> {
  let mut frames: Vec<&CoreFrame> = report
    .core_backtrace
    .iter()
    .filter(|f| f.thread == report.crash_thread)
    .collect();
  frames.sort_by_key(|f| f.frame);
  frames
}

/// Keep at most `cutoff` leading frames.
pub fn truncate<'a>(frames: &[&'a CoreFrame], cutoff: usize) -> Vec<&'a CoreFrame> {
  frames.iter().take(cutoff).copied().collect()
}

/// Names when every frame has one, else hashes when every frame has one.
pub fn choose_strategy(frames: &[&CoreFrame]) -> Result<HashType, IngestError> {
  if frames.is_empty() {
    return Err(IngestError::insufficient("crash thread has no frames"));
  }
  if frames.iter().all(|f| f.funcname.is_some()) {
    Ok(HashType::Names)
  } else if frames.iter().all(|f| f.funchash.is_some()) {
    Ok(HashType::Hashes)
  } else {
    Err(IngestError::insufficient(
      "either function names or function hashes are required for every crash-thread frame",
    ))
  }
}

/// `"<name-or-hash> @ <path>[ + <line>]"`. The strategy was chosen so that
/// the selected attribute is present on every frame.
pub fn format_frame(frame: &CoreFrame, strategy: HashType, line: Option<i64>) -> String {
  let ident = match strategy {
    HashType::Names => frame.funcname.as_deref(),
    HashType::Hashes => frame.funchash.as_deref(),
  }
  .unwrap_or_default();

  match line {
    Some(line) => format!("{} @ {} + {}", ident, frame.path, line),
    None => format!("{} @ {}", ident, frame.path),
  }
}

/// blake3 hex digest over the newline-joined seed and lines.
pub fn hash<S: AsRef<str>>(seed: &[S], lines: &[String]) -> String {
  let mut hasher = blake3::Hasher::new();
  let mut first = true;
  for part in seed.iter().map(AsRef::as_ref).chain(lines.iter().map(String::as_str)) {
    if !first {
      hasher.update(b"\n");
    }
    hasher.update(part.as_bytes());
    first = false;
  }
  hasher.finalize().to_hex().to_string()
}

/// Crash thread prepared for hashing: selected, truncated, strategy fixed.
#[derive(Debug, Clone)]
pub struct NormalizedThread<'a> {
  /// The full crash thread, as stored on a new backtrace.
  pub frames: Vec<&'a CoreFrame>,
  /// Number of leading frames that feed the hash.
  pub hashed: usize,
  pub strategy: HashType,
}

/// Select, truncate and pick the strategy. Pure; fails without side effects.
pub fn normalize<'a>(
  report: &'a UReport,
  cutoff: usize,
) -> Result<NormalizedThread<'a>, IngestError> {
  let frames = select_crash_thread(report);
  let head = truncate(&frames, cutoff);
  let strategy = choose_strategy(&head)?;
  let hashed = head.len();
  Ok(NormalizedThread {
    frames,
    hashed,
    strategy,
  })
}

/// Signature of a normalized thread within `component`.
pub fn compute(thread: &NormalizedThread<'_>, problem: &dyn ProblemType, component: &str) -> Signature {
  let lines: Vec<String> = thread.frames[..thread.hashed]
    .iter()
    .map(|f| format_frame(f, thread.strategy, problem.frame_line(f)))
    .collect();
  Signature {
    hash_type: thread.strategy,
    hash: hash(&[component], &lines),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::problem;
  use crate::types::ProblemKind;

  fn frame(thread: i64, idx: i64, name: Option<&str>, fhash: Option<&str>) -> CoreFrame {
    CoreFrame {
      thread,
      frame: idx,
      buildid: "f76f656ab6e1b558fc78d0496f1960071565b0aa".into(),
      path: "/usr/bin/will_crash".into(),
      offset: 100 + idx,
      funcname: name.map(Into::into),
      funchash: fhash.map(Into::into),
    }
  }

  fn report(crash_thread: i64, frames: Vec<CoreFrame>) -> UReport {
    let v = serde_json::json!({
      "type": "userspace",
      "reason": "SIGSEGV",
      "uptime": 10,
      "executable": "/usr/bin/will_crash",
      "installed_package": {"name": "will-crash", "version": "0.5", "release": "1.fc20", "epoch": 0, "architecture": "x86_64"},
      "related_packages": [],
      "os": {"name": "Fedora", "version": "20"},
      "architecture": "x86_64",
      "reporter": {"name": "abrt", "version": "2.1.11"},
      "crash_thread": crash_thread,
      "core_backtrace": []
    });
    let mut r: UReport = serde_json::from_value(v).unwrap();
    r.core_backtrace = frames;
    r
  }

  fn named(n: usize) -> Vec<CoreFrame> {
    (1..=n as i64)
      .map(|i| frame(0, i, Some(&format!("fn_{}", i)), Some("abcdef")))
      .collect()
  }

  #[test]
  fn crash_thread_is_filtered_and_sorted() {
    let r = report(
      1,
      vec![
        frame(1, 3, Some("c"), None),
        frame(0, 1, Some("other"), None),
        frame(1, 1, Some("a"), None),
        frame(1, 2, Some("b"), None),
      ],
    );
    let names: Vec<_> = select_crash_thread(&r)
      .iter()
      .map(|f| f.funcname.clone().unwrap())
      .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
  }

  #[test]
  fn names_preferred_over_hashes() {
    let r = report(0, named(3));
    let t = normalize(&r, 16).unwrap();
    assert_eq!(t.strategy, HashType::Names);
  }

  #[test]
  fn hashes_used_when_a_name_is_missing() {
    let r = report(
      0,
      vec![frame(0, 1, Some("a"), Some("aa")), frame(0, 2, None, Some("bb"))],
    );
    assert_eq!(normalize(&r, 16).unwrap().strategy, HashType::Hashes);
  }

  #[test]
  fn frame_without_name_or_hash_fails() {
    let r = report(0, vec![frame(0, 1, Some("a"), None), frame(0, 2, None, None)]);
    let err = normalize(&r, 16).unwrap_err();
    assert!(matches!(err, IngestError::InsufficientSignatureData(_)));
  }

  #[test]
  fn incomplete_frames_beyond_cutoff_do_not_matter() {
    let mut frames = named(3);
    frames.push(frame(0, 4, None, None));
    let r = report(0, frames);
    let t = normalize(&r, 3).unwrap();
    assert_eq!(t.strategy, HashType::Names);
    assert_eq!(t.frames.len(), 4);
    assert_eq!(t.hashed, 3);
  }

  #[test]
  fn empty_crash_thread_fails() {
    let r = report(7, named(2));
    assert!(normalize(&r, 16).is_err());
  }

  #[test]
  fn format_frame_with_and_without_line() {
    let f = frame(0, 1, Some("main"), None);
    assert_eq!(format_frame(&f, HashType::Names, None), "main @ /usr/bin/will_crash");
    assert_eq!(format_frame(&f, HashType::Names, Some(7)), "main @ /usr/bin/will_crash + 7");
  }

  #[test]
  fn same_input_same_signature() {
    let p = problem::for_kind(ProblemKind::Userspace);
    let r1 = report(0, named(5));
    let r2 = report(0, named(5));
    let s1 = compute(&normalize(&r1, 16).unwrap(), p, "will-crash");
    let s2 = compute(&normalize(&r2, 16).unwrap(), p, "will-crash");
    assert_eq!(s1, s2);
  }

  #[test]
  fn component_seed_separates_identical_stacks() {
    let p = problem::for_kind(ProblemKind::Userspace);
    let r = report(0, named(5));
    let t = normalize(&r, 16).unwrap();
    assert_ne!(compute(&t, p, "will-crash").hash, compute(&t, p, "bash").hash);
  }

  #[test]
  fn truncation_invariance() {
    let p = problem::for_kind(ProblemKind::Userspace);
    let long = report(0, named(30));
    let short = report(0, named(16));
    assert_eq!(
      compute(&normalize(&long, 16).unwrap(), p, "will-crash"),
      compute(&normalize(&short, 16).unwrap(), p, "will-crash"),
    );
  }

  #[test]
  fn digest_is_64_hex_chars() {
    let d = hash(&["c"], &["x @ /y".to_string()]);
    assert_eq!(d.len(), 64);
    assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn hash_matches_joined_input() {
    let d = hash(&["comp"], &["a @ /x".to_string(), "b @ /y".to_string()]);
    let expected = blake3::hash(b"comp\na @ /x\nb @ /y").to_hex().to_string();
    assert_eq!(d, expected);
  }
}
