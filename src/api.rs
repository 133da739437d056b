//! HTTP boundary: `POST /extract` and `GET /health`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::pipeline::{InvoicePipeline, PipelineOutcome};

/// Shared state for the extraction routes.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<InvoicePipeline>,
    pub service_name: String,
}

/// Build the service router.
pub fn extraction_routes(state: ApiState) -> Router {
    Router::new()
        .route("/extract", post(extract))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
    }))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ExtractRequest {
    email_id: Option<String>,
    is_invoice: bool,
}

impl ExtractRequest {
    /// Malformed or non-object bodies read as an empty request.
    fn parse(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let email_id = value
            .get("email_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let is_invoice = match value.get("isInvoice") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag.trim().eq_ignore_ascii_case("true"),
            _ => false,
        };
        Self {
            email_id,
            is_invoice,
        }
    }
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// POST /extract
///
/// 400 without `email_id`, 200 when the mail is not an invoice, 201 once
/// the record has been handed to the broker, 500 otherwise.
async fn extract(State(state): State<ApiState>, body: Bytes) -> Response {
    let request = ExtractRequest::parse(&body);

    let Some(email_id) = request.email_id else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({"status": "error", "message": "Missing required field: email_id"}),
        );
    };

    if !request.is_invoice {
        info!(email_id = %email_id, "Not an invoice; skipping extraction");
        return reply(
            StatusCode::OK,
            json!({"status": "skipped", "message": "Email is not an invoice"}),
        );
    }

    match state.pipeline.run(&email_id).await {
        Ok(PipelineOutcome::Published { format, .. }) => {
            let topology = state.pipeline.topology();
            reply(
                StatusCode::CREATED,
                json!({
                    "status": "success",
                    "message": "Extraction and hand-off successful",
                    "details": {
                        "format": format,
                        "exchange": topology.exchange,
                        "routing_key": topology.routing_key,
                    },
                }),
            )
        }
        Ok(PipelineOutcome::NoAttachment) => reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "status": "error",
                "message": format!("Failed to extract invoice data for email_id: {email_id}"),
            }),
        ),
        Err(e) => {
            error!(email_id = %email_id, error = %e, "Extraction request failed");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "status": "error",
                    "message": format!("An exception occurred during extraction: {e}"),
                }),
            )
        }
    }
}
