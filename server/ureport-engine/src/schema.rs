//! Declarative uReport schema and the interpreter that checks payloads against it.
//!
//! A schema is a tree of three node kinds: scalars (type + optional pattern
//! and bounds), sequences (element schema + minimum length) and mappings
//! (field name -> schema + mandatory flag). Mappings are closed: a key the
//! schema does not declare is an error. Validation never touches the input.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
  Str,
  Int,
}

impl ScalarKind {
  fn name(self) -> &'static str {
    match self {
      Self::Str => "string",
      Self::Int => "int",
    }
  }
}

#[derive(Debug, Clone)]
pub struct Scalar {
  pub kind: ScalarKind,
  pub pattern: Option<Regex>,
  pub min: Option<i64>,
  pub max: Option<i64>,
  pub max_len: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Field {
  pub schema: Schema,
  pub mandatory: bool,
}

#[derive(Debug, Clone)]
pub struct Mapping {
  pub fields: Vec<(&'static str, Field)>,
  /// Open mappings accept arbitrary extra keys without inspecting them.
  pub open: bool,
}

#[derive(Debug, Clone)]
pub enum Schema {
  Scalar(Scalar),
  Sequence { element: Box<Schema>, min_len: usize },
  Mapping(Mapping),
}

impl Schema {
  pub fn string(pattern: &str) -> Self {
    Self::Scalar(Scalar {
      kind: ScalarKind::Str,
      pattern: Some(compile(pattern)),
      min: None,
      max: None,
      max_len: None,
    })
  }

  pub fn int() -> Self {
    Self::Scalar(Scalar {
      kind: ScalarKind::Int,
      pattern: None,
      min: None,
      max: None,
      max_len: None,
    })
  }

  pub fn min(mut self, bound: i64) -> Self {
    if let Self::Scalar(s) = &mut self {
      s.min = Some(bound);
    }
    self
  }

  pub fn max(mut self, bound: i64) -> Self {
    if let Self::Scalar(s) = &mut self {
      s.max = Some(bound);
    }
    self
  }

  pub fn max_len(mut self, len: usize) -> Self {
    if let Self::Scalar(s) = &mut self {
      s.max_len = Some(len);
    }
    self
  }

  pub fn list(element: Schema) -> Self {
    Self::Sequence {
      element: Box::new(element),
      min_len: 0,
    }
  }

  pub fn non_empty_list(element: Schema) -> Self {
    Self::Sequence {
      element: Box::new(element),
      min_len: 1,
    }
  }

  pub fn mapping(fields: Vec<(&'static str, Field)>) -> Self {
    Self::Mapping(Mapping { fields, open: false })
  }

  /// Mapping whose content is not inspected (`proc_status`, `proc_limits`).
  pub fn open_mapping() -> Self {
    Self::Mapping(Mapping {
      fields: Vec::new(),
      open: true,
    })
  }
}

pub fn mand(schema: Schema) -> Field {
  Field {
    schema,
    mandatory: true,
  }
}

pub fn opt(schema: Schema) -> Field {
  Field {
    schema,
    mandatory: false,
  }
}

fn compile(pattern: &str) -> Regex {
  Regex::new(pattern).unwrap_or_else(|e| panic!("invalid schema pattern {pattern:?}: {e}"))
}

/// Check `value` against `schema`. The first violation wins; its path names
/// the offending field relative to `value`.
pub fn validate(value: &Value, schema: &Schema) -> Result<(), SchemaError> {
  match schema {
    Schema::Scalar(scalar) => validate_scalar(value, scalar),
    Schema::Sequence { element, min_len } => {
      let items = value.as_array().ok_or_else(|| type_mismatch("list", value))?;
      if items.len() < *min_len {
        return Err(SchemaError::new(format!(
          "expected at least {} element(s), had {}",
          min_len,
          items.len()
        )));
      }
      for (i, item) in items.iter().enumerate() {
        validate(item, element).map_err(|e| e.at_index(i))?;
      }
      Ok(())
    }
    Schema::Mapping(mapping) => {
      let obj = value.as_object().ok_or_else(|| type_mismatch("mapping", value))?;
      for (name, field) in &mapping.fields {
        match obj.get(*name) {
          Some(v) => validate(v, &field.schema).map_err(|e| e.in_field(name))?,
          None if field.mandatory => {
            return Err(SchemaError::new("missing mandatory element").in_field(name));
          }
          None => {}
        }
      }
      if !mapping.open {
        let unknown: Vec<&str> = obj
          .keys()
          .map(String::as_str)
          .filter(|k| !mapping.fields.iter().any(|(name, _)| name == k))
          .collect();
        if !unknown.is_empty() {
          return Err(SchemaError::new(format!(
            "unknown elements present: {}",
            unknown.join(", ")
          )));
        }
      }
      Ok(())
    }
  }
}

fn validate_scalar(value: &Value, scalar: &Scalar) -> Result<(), SchemaError> {
  match scalar.kind {
    ScalarKind::Str => {
      let s = value
        .as_str()
        .ok_or_else(|| type_mismatch(scalar.kind.name(), value))?;
      if let Some(max_len) = scalar.max_len {
        if s.len() > max_len {
          return Err(SchemaError::new(format!(
            "string is {} bytes long, limit is {}",
            s.len(),
            max_len
          )));
        }
      }
      if let Some(re) = &scalar.pattern {
        if !re.is_match(s) {
          return Err(SchemaError::new(format!(
            "string \"{}\" contains illegal characters",
            s
          )));
        }
      }
    }
    ScalarKind::Int => {
      let n = value
        .as_i64()
        .ok_or_else(|| type_mismatch(scalar.kind.name(), value))?;
      if let Some(min) = scalar.min {
        if n < min {
          return Err(SchemaError::new(format!("value {} is below minimum {}", n, min)));
        }
      }
      if let Some(max) = scalar.max {
        if n > max {
          return Err(SchemaError::new(format!("value {} is above maximum {}", n, max)));
        }
      }
    }
  }
  Ok(())
}

fn type_mismatch(expected: &str, value: &Value) -> SchemaError {
  SchemaError::new(format!(
    "typecheck failed: expected {}, had {}",
    expected,
    value_kind(value)
  ))
}

fn value_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(n) if n.is_i64() => "int",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "list",
    Value::Object(_) => "mapping",
  }
}

// ---------------------------------------------------------------------------
// uReport schema
// ---------------------------------------------------------------------------

const RE_EXEC: &str = r"^/[0-9a-zA-Z/_.+\-]+$";
const RE_FUNCNAME: &str = r"^[0-9a-zA-Z_<>:*+=~@! &(),/|^.\[\]\-]+$";
const RE_HEX: &str = r"^(0[xX])?[0-9a-fA-F]+$";
const RE_PACKAGE: &str = r"^[0-9a-zA-Z_.+~\-]+$";
const RE_PHRASE: &str = r"^[0-9a-zA-Z :_/+*.()?!\-]+$";
const RE_SEPOL: &str = r"^[a-zA-Z0-9_.\-]+(:[a-zA-Z0-9_.\-]+){3,4}$";
const RE_YESNO: &str = r"(?i)^(yes|no)$";

fn package_schema() -> Schema {
  Schema::mapping(vec![
    ("name", mand(Schema::string(RE_PACKAGE))),
    ("version", mand(Schema::string(RE_PACKAGE))),
    ("release", mand(Schema::string(RE_PACKAGE))),
    ("architecture", mand(Schema::string(RE_PHRASE))),
    ("epoch", mand(Schema::int().min(0))),
  ])
}

fn name_version_schema() -> Schema {
  Schema::mapping(vec![
    ("name", mand(Schema::string(RE_PHRASE))),
    ("version", mand(Schema::string(RE_PACKAGE))),
  ])
}

fn core_frame_schema() -> Schema {
  Schema::mapping(vec![
    ("thread", mand(Schema::int())),
    ("frame", mand(Schema::int())),
    ("buildid", mand(Schema::string(RE_HEX).max_len(1024))),
    ("path", mand(Schema::string(RE_EXEC).max_len(512))),
    ("offset", mand(Schema::int().min(0))),
    ("funcname", opt(Schema::string(RE_FUNCNAME).max_len(2048))),
    ("funchash", opt(Schema::string(RE_HEX).max_len(1024))),
  ])
}

fn ureport_schema() -> Schema {
  Schema::mapping(vec![
    ("type", mand(Schema::string(r"(?i)^(python|userspace|kerneloops)$"))),
    ("reason", mand(Schema::string(RE_PHRASE).max_len(512))),
    ("uptime", mand(Schema::int())),
    ("executable", mand(Schema::string(RE_EXEC).max_len(512))),
    ("installed_package", mand(package_schema())),
    ("running_package", opt(package_schema())),
    (
      "related_packages",
      mand(Schema::list(Schema::mapping(vec![
        ("installed_package", mand(package_schema())),
        ("running_package", opt(package_schema())),
      ]))),
    ),
    ("os", mand(name_version_schema())),
    ("architecture", mand(Schema::string(RE_PHRASE))),
    ("reporter", mand(name_version_schema())),
    ("crash_thread", mand(Schema::int())),
    ("core_backtrace", mand(Schema::list(core_frame_schema()))),
    ("user_type", opt(Schema::string(r"(?i)^(root|nologin|local|remote)$"))),
    (
      "os_state",
      opt(Schema::mapping(vec![
        ("suspend", mand(Schema::string(RE_YESNO))),
        ("boot", mand(Schema::string(RE_YESNO))),
        ("login", mand(Schema::string(RE_YESNO))),
        ("logout", mand(Schema::string(RE_YESNO))),
        ("shutdown", mand(Schema::string(RE_YESNO))),
      ])),
    ),
    (
      "selinux",
      opt(Schema::mapping(vec![
        ("mode", mand(Schema::string(r"(?i)^(enforcing|permissive|disabled)$"))),
        ("context", opt(Schema::string(RE_SEPOL))),
        ("policy_package", opt(package_schema())),
      ])),
    ),
    ("proc_status", opt(Schema::open_mapping())),
    ("proc_limits", opt(Schema::open_mapping())),
  ])
}

/// The top-level uReport schema, built once.
pub static UREPORT_SCHEMA: LazyLock<Schema> = LazyLock::new(ureport_schema);

/// Validate a raw uReport value against [`UREPORT_SCHEMA`].
pub fn validate_ureport(value: &Value) -> Result<(), SchemaError> {
  validate(value, &UREPORT_SCHEMA)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample() -> Value {
    json!({
      "type": "python",
      "reason": "TypeError",
      "uptime": 1,
      "executable": "/usr/bin/faf-btserver-cgi",
      "installed_package": {"name": "faf", "version": "0.4", "release": "1.fc16", "epoch": 0, "architecture": "noarch"},
      "related_packages": [
        {"installed_package": {"name": "python", "version": "2.7.2", "release": "4.fc16", "epoch": 0, "architecture": "x86_64"}}
      ],
      "os": {"name": "Fedora", "version": "16"},
      "architecture": "x86_64",
      "reporter": {"name": "abrt", "version": "2.0.7-2.fc16"},
      "crash_thread": 0,
      "core_backtrace": [
        {"thread": 0, "frame": 1, "buildid": "f76f656ab6e1b558fc78d0496f1960071565b0aa", "offset": 24,
         "path": "/usr/bin/faf-btserver-cgi", "funcname": "<module>"},
        {"thread": 0, "frame": 2, "buildid": "b07daccd370e885bf3d459984a4af09eb889360a", "offset": 190,
         "path": "/usr/lib64/python2.7/re.py", "funcname": "compile"}
      ],
      "user_type": "root",
      "selinux": {"mode": "permissive", "context": "unconfined_u:unconfined_r:unconfined_t:s0"}
    })
  }

  #[test]
  fn sample_is_valid() {
    validate_ureport(&sample()).unwrap();
  }

  #[test]
  fn missing_mandatory_field_names_it() {
    let mut v = sample();
    v.as_object_mut().unwrap().remove("core_backtrace");
    let err = validate_ureport(&v).unwrap_err();
    assert_eq!(err.path, "core_backtrace");
    assert_eq!(err.reason, "missing mandatory element");
  }

  #[test]
  fn extra_top_level_field_rejected() {
    let mut v = sample();
    v["unexpected"] = json!(1);
    let err = validate_ureport(&v).unwrap_err();
    assert!(err.path.is_empty());
    assert!(err.reason.starts_with("unknown elements present"));
    assert!(err.reason.contains("unexpected"));
  }

  #[test]
  fn nested_error_carries_full_path() {
    let mut v = sample();
    v["core_backtrace"][1]["path"] = json!("relative/path.py");
    let err = validate_ureport(&v).unwrap_err();
    assert_eq!(err.path, "core_backtrace[1].path");
    assert!(err.reason.contains("illegal characters"));
  }

  #[test]
  fn type_mismatch_reported() {
    let mut v = sample();
    v["uptime"] = json!("long");
    let err = validate_ureport(&v).unwrap_err();
    assert_eq!(err.path, "uptime");
    assert_eq!(err.reason, "typecheck failed: expected int, had string");
  }

  #[test]
  fn float_is_not_an_int() {
    let mut v = sample();
    v["crash_thread"] = json!(0.5);
    let err = validate_ureport(&v).unwrap_err();
    assert_eq!(err.path, "crash_thread");
  }

  #[test]
  fn enum_fields_are_case_insensitive() {
    let mut v = sample();
    v["type"] = json!("UserSpace");
    v["selinux"]["mode"] = json!("ENFORCING");
    validate_ureport(&v).unwrap();
  }

  #[test]
  fn optional_fields_may_be_absent() {
    let mut v = sample();
    let obj = v.as_object_mut().unwrap();
    obj.remove("user_type");
    obj.remove("selinux");
    validate_ureport(&v).unwrap();
  }

  #[test]
  fn open_mappings_accept_anything() {
    let mut v = sample();
    v["proc_status"] = json!({"VmRSS": "1024 kB", "Threads": 4});
    validate_ureport(&v).unwrap();
  }

  #[test]
  fn nested_unknown_element_rejected() {
    let mut v = sample();
    v["installed_package"]["vendor"] = json!("Fedora Project");
    let err = validate_ureport(&v).unwrap_err();
    assert_eq!(err.path, "installed_package");
    assert!(err.reason.contains("vendor"));
  }

  #[test]
  fn negative_epoch_below_minimum() {
    let mut v = sample();
    v["installed_package"]["epoch"] = json!(-1);
    let err = validate_ureport(&v).unwrap_err();
    assert_eq!(err.path, "installed_package.epoch");
  }

  #[test]
  fn int_bounds_are_inclusive() {
    let schema = Schema::int().min(0).max(3);
    assert!(validate(&json!(0), &schema).is_ok());
    assert!(validate(&json!(3), &schema).is_ok());
    let err = validate(&json!(4), &schema).unwrap_err();
    assert!(err.reason.contains("above maximum 3"));
  }

  #[test]
  fn sequence_min_len_enforced() {
    let schema = Schema::non_empty_list(Schema::int());
    let err = validate(&json!([]), &schema).unwrap_err();
    assert!(err.reason.contains("at least 1"));
  }

  #[test]
  fn validation_does_not_mutate_input() {
    let v = sample();
    let before = v.clone();
    let _ = validate_ureport(&v);
    assert_eq!(v, before);
  }
}
