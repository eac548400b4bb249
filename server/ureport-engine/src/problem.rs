//! Problem-type capabilities.
//!
//! Every uReport `type` gets one [`ProblemType`] implementation; the engine
//! picks it by [`ProblemKind`] tag and never branches on the type itself.

use crate::config::{Config, ProblemSettings};
use crate::error::SchemaError;
use crate::types::{CoreFrame, ProblemKind, UReport};

pub trait ProblemType: Send + Sync {
  fn kind(&self) -> ProblemKind;

  /// Type-specific checks on top of the shared schema.
  fn check(&self, _report: &UReport) -> Result<(), SchemaError> {
    Ok(())
  }

  /// Source line that participates in the frame signature, if the type has one.
  fn frame_line(&self, _frame: &CoreFrame) -> Option<i64> {
    None
  }

  /// `(source_path, line_number)` recorded on a freshly created symbol source.
  fn source_location(&self, _frame: &CoreFrame) -> (Option<String>, Option<i64>) {
    (None, None)
  }

  /// Key under which binaries are deduplicated in the symbol table.
  fn normalize_path(&self, path: &str, normalize: bool) -> String {
    if normalize {
      libname(path)
    } else {
      path.to_string()
    }
  }

  /// Function recorded as the crash function of a new backtrace.
  fn crash_function(&self, frames: &[&CoreFrame]) -> Option<String> {
    frames.first().and_then(|f| f.funcname.clone())
  }

  fn settings<'a>(&self, config: &'a Config) -> &'a ProblemSettings {
    config.settings(self.kind())
  }
}

/// Unhandled Python exceptions. `offset` carries the source line.
pub struct PythonProblem;

/// Native (core dump) crashes.
pub struct UserspaceProblem;

/// Kernel oopses.
pub struct KerneloopsProblem;

impl ProblemType for PythonProblem {
  fn kind(&self) -> ProblemKind {
    ProblemKind::Python
  }

  fn check(&self, report: &UReport) -> Result<(), SchemaError> {
    for (i, frame) in report.core_backtrace.iter().enumerate() {
      if frame.offset < 1 {
        return Err(
          SchemaError::new("python frames carry a line number >= 1 in offset")
            .in_field("offset")
            .at_index(i)
            .in_field("core_backtrace"),
        );
      }
    }
    Ok(())
  }

  fn frame_line(&self, frame: &CoreFrame) -> Option<i64> {
    Some(frame.offset)
  }

  fn source_location(&self, frame: &CoreFrame) -> (Option<String>, Option<i64>) {
    (Some(frame.path.clone()), Some(frame.offset))
  }

  /// Python tracebacks list the innermost call last.
  fn crash_function(&self, frames: &[&CoreFrame]) -> Option<String> {
    frames.last().and_then(|f| f.funcname.clone())
  }
}

impl ProblemType for UserspaceProblem {
  fn kind(&self) -> ProblemKind {
    ProblemKind::Userspace
  }
}

impl ProblemType for KerneloopsProblem {
  fn kind(&self) -> ProblemKind {
    ProblemKind::Kerneloops
  }

  /// Kernel frames are keyed by module name (`.../ext4.ko.xz` -> `ext4`).
  fn normalize_path(&self, path: &str, normalize: bool) -> String {
    if !normalize {
      return path.to_string();
    }
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.find(".ko") {
      Some(idx) if idx > 0 => base[..idx].to_string(),
      _ => base.to_string(),
    }
  }
}

static PYTHON: PythonProblem = PythonProblem;
static USERSPACE: UserspaceProblem = UserspaceProblem;
static KERNELOOPS: KerneloopsProblem = KerneloopsProblem;

/// Select the implementation for a type tag.
pub fn for_kind(kind: ProblemKind) -> &'static dyn ProblemType {
  match kind {
    ProblemKind::Python => &PYTHON,
    ProblemKind::Userspace => &USERSPACE,
    ProblemKind::Kerneloops => &KERNELOOPS,
  }
}

/// Library name of a binary path: basename, cut right after `.so` so that
/// versioned sonames collapse (`/usr/lib64/libc.so.6` -> `libc.so`).
pub fn libname(path: &str) -> String {
  let base = path.rsplit('/').next().unwrap_or(path);
  match base.rfind(".so") {
    Some(idx) if idx > 0 => base[..idx + 3].to_string(),
    _ => base.to_string(),
  }
}
