//! HTTP handlers for the uReport service.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use ureport_engine::{IngestError, IngestOptions, IngestOutcome};

use crate::state::AppState;
use crate::types::{ErrorResponse, NewReportResponse, ReportedTo};

pub async fn health() -> &'static str {
  "ok"
}

/// `POST /reports/new`: the body is the raw uReport JSON.
pub async fn new_report(State(state): State<Arc<AppState>>, body: String) -> Response {
  let request_id = Uuid::new_v4();
  let span = info_span!("new_report", %request_id, len = body.len());

  async move {
    let opts = IngestOptions {
      received_at: Some(Utc::now()),
      ..IngestOptions::default()
    };
    match state.engine.ingest_raw(&body, opts).await {
      Ok(outcome) => {
        info!(report_id = outcome.report_id, known = outcome.known, "ureport accepted");
        (StatusCode::ACCEPTED, Json(respond(&state, &outcome))).into_response()
      }
      Err(e) => error_response(&e),
    }
  }
  .instrument(span)
  .await
}

fn respond(state: &AppState, outcome: &IngestOutcome) -> NewReportResponse {
  let mut reported_to = Vec::new();
  if outcome.known {
    if let Some(base) = &state.public_url {
      let url = format!("{}/reports/{}/", base.trim_end_matches('/'), outcome.report_id);
      reported_to.push(ReportedTo::url("uReport Server", url));
    }
    for bug in &outcome.bug_urls {
      reported_to.push(ReportedTo::url("Bugzilla", bug.as_str()));
    }
  }

  let message = if reported_to.is_empty() {
    None
  } else {
    Some(
      reported_to
        .iter()
        .map(|r| r.value.as_str())
        .collect::<Vec<_>>()
        .join("\n"),
    )
  };

  NewReportResponse {
    result: outcome.known,
    bthash: outcome.signature.hash.clone(),
    message,
    reported_to,
  }
}

fn error_response(err: &IngestError) -> Response {
  let status = match err {
    IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    e if e.is_retriable() => StatusCode::SERVICE_UNAVAILABLE,
    _ => StatusCode::BAD_REQUEST,
  };
  if status == StatusCode::SERVICE_UNAVAILABLE {
    error!(error = %err, "ureport could not be stored");
  } else {
    info!(error = %err, "ureport rejected");
  }
  let body = ErrorResponse {
    error: err.to_string(),
  };
  (status, Json(body)).into_response()
}
