//! Engine configuration with sane defaults.
//!
//! The surrounding system hands the engine an opaque key/value surface
//! (`processing.hashframes`, `ureport.known`, ...). Per-problem-type keys
//! (`processing.pythonhashframes`) win over the generic ones.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::matcher::DuplicatePolicy;
use crate::types::ProblemKind;

/// Every key the engine understands, without per-type variants.
pub const KNOWN_KEYS: &[&str] = &[
  "processing.hashframes",
  "processing.cmpframes",
  "processing.clusterframes",
  "processing.cutthreshold",
  "processing.normalize",
  "ureport.known",
  "ureport.maxlength",
];

/// Processing settings resolved for one problem type.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemSettings {
  /// Max crash-thread frames fed into the signature hash.
  pub hash_frames: usize,
  /// Max frames compared by the (external) clustering job.
  pub compare_frames: usize,
  /// Signature cut-off ratio used by the (external) clustering job.
  pub cut_threshold: f64,
  /// Normalize binary paths to library names for symbol identity.
  pub normalize: bool,
}

impl Default for ProblemSettings {
  fn default() -> Self {
    Self {
      hash_frames: 16,
      compare_frames: 16,
      cut_threshold: 0.3,
      normalize: true,
    }
  }
}

/// Tunables for the ingest pipeline.
#[derive(Debug, Clone)]
pub struct Config {
  pub python: ProblemSettings,
  pub userspace: ProblemSettings,
  pub kerneloops: ProblemSettings,
  /// Active duplicate-detection policy.
  pub known_policy: DuplicatePolicy,
  /// Raw payloads larger than this are rejected before parsing.
  pub max_ureport_length: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      python: ProblemSettings::default(),
      userspace: ProblemSettings::default(),
      kerneloops: ProblemSettings::default(),
      known_policy: DuplicatePolicy::Exact,
      max_ureport_length: 1 << 20,
    }
  }
}

impl Config {
  /// Build a config from key/value pairs. Unknown keys are ignored so the
  /// same source can carry settings for other components.
  pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let map: HashMap<String, String> = pairs
      .into_iter()
      .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into().trim().to_string()))
      .collect();

    let mut config = Config::default();
    for kind in ProblemKind::ALL {
      *config.settings_mut(kind) = resolve_settings(&map, kind)?;
    }

    if let Some(name) = map.get("ureport.known") {
      config.known_policy = name.parse()?;
    }
    if let Some(raw) = map.get("ureport.maxlength") {
      config.max_ureport_length = parse_positive("ureport.maxlength", raw)?;
    }

    Ok(config)
  }

  /// Read every known key (and its per-type variants) from the process
  /// environment: `processing.pythonhashframes` -> `PROCESSING_PYTHONHASHFRAMES`.
  pub fn from_env() -> Result<Self, ConfigError> {
    let pairs = all_keys()
      .into_iter()
      .filter_map(|key| std::env::var(env_name(&key)).ok().map(|v| (key, v)));
    Self::from_pairs(pairs)
  }

  pub fn settings(&self, kind: ProblemKind) -> &ProblemSettings {
    match kind {
      ProblemKind::Python => &self.python,
      ProblemKind::Userspace => &self.userspace,
      ProblemKind::Kerneloops => &self.kerneloops,
    }
  }

  fn settings_mut(&mut self, kind: ProblemKind) -> &mut ProblemSettings {
    match kind {
      ProblemKind::Python => &mut self.python,
      ProblemKind::Userspace => &mut self.userspace,
      ProblemKind::Kerneloops => &mut self.kerneloops,
    }
  }
}

fn all_keys() -> Vec<String> {
  let mut keys: Vec<String> = KNOWN_KEYS.iter().map(|k| k.to_string()).collect();
  for kind in ProblemKind::ALL {
    for setting in ["hashframes", "cmpframes", "cutthreshold", "normalize"] {
      keys.push(format!("processing.{}{}", kind.as_str(), setting));
    }
  }
  keys
}

fn env_name(key: &str) -> String {
  key.to_ascii_uppercase().replace('.', "_")
}

fn resolve_settings(
  map: &HashMap<String, String>,
  kind: ProblemKind,
) -> Result<ProblemSettings, ConfigError> {
  let t = kind.as_str();
  let defaults = ProblemSettings::default();

  let hash_frames = match lookup(map, &[format!("processing.{}hashframes", t), "processing.hashframes".into()]) {
    Some((key, raw)) => parse_positive(key, raw)?,
    None => defaults.hash_frames,
  };
  let compare_frames = match lookup(
    map,
    &[
      format!("processing.{}cmpframes", t),
      "processing.cmpframes".into(),
      "processing.clusterframes".into(),
    ],
  ) {
    Some((key, raw)) => parse_positive(key, raw)?,
    None => defaults.compare_frames,
  };
  let cut_threshold = match lookup(map, &[format!("processing.{}cutthreshold", t), "processing.cutthreshold".into()]) {
    Some((key, raw)) => raw
      .parse::<f64>()
      .ok()
      .filter(|v| (0.0..=1.0).contains(v))
      .ok_or_else(|| ConfigError::invalid(key, raw))?,
    None => defaults.cut_threshold,
  };
  let normalize = match lookup(map, &[format!("processing.{}normalize", t), "processing.normalize".into()]) {
    Some((key, raw)) => str2bool(raw).ok_or_else(|| ConfigError::invalid(key, raw))?,
    None => defaults.normalize,
  };

  Ok(ProblemSettings {
    hash_frames,
    compare_frames,
    cut_threshold,
    normalize,
  })
}

/// First key in the chain that has a value.
fn lookup<'a>(map: &'a HashMap<String, String>, keys: &'a [String]) -> Option<(&'a str, &'a str)> {
  keys
    .iter()
    .find_map(|k| map.get(k).map(|v| (k.as_str(), v.as_str())))
}

fn parse_positive(key: &str, raw: &str) -> Result<usize, ConfigError> {
  raw
    .parse::<usize>()
    .ok()
    .filter(|&v| v > 0)
    .ok_or_else(|| ConfigError::invalid(key, raw))
}

fn str2bool(raw: &str) -> Option<bool> {
  match raw.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}
