//! Response bodies of the uReport endpoints.

use serde::Serialize;

/// Answer to a submitted uReport.
#[derive(Debug, Serialize)]
pub struct NewReportResponse {
  /// True when the crash is already known.
  pub result: bool,
  pub bthash: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub reported_to: Vec<ReportedTo>,
}

/// Where a known crash has been reported.
#[derive(Debug, Serialize)]
pub struct ReportedTo {
  pub reporter: String,
  pub value: String,
  #[serde(rename = "type")]
  pub kind: String,
}

impl ReportedTo {
  pub fn url(reporter: &str, url: impl Into<String>) -> Self {
    Self {
      reporter: reporter.to_string(),
      value: url.into(),
      kind: "url".to_string(),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
}
