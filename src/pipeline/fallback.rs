//! Model-driven extraction for attachments with no structured XML.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ExtractionError;
use crate::llm::{ExtractionPrompt, GenerativeModel, normalize_model_name};

/// Turns raw invoice text into a JSON object with one model call.
pub struct FallbackExtractor {
    model: Arc<dyn GenerativeModel>,
}

impl FallbackExtractor {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    /// Extract an invoice object from `raw_text`.
    ///
    /// Checks run cheapest first: instruction, text, catalog. The model is
    /// called at most once and never retried.
    pub async fn extract(
        &self,
        raw_text: &str,
        prompt: &ExtractionPrompt,
    ) -> Result<Map<String, Value>, ExtractionError> {
        if prompt.instruction().trim().is_empty() {
            return Err(ExtractionError::MissingInstruction(
                "extraction instruction is empty".to_string(),
            ));
        }
        if raw_text.trim().is_empty() {
            return Err(ExtractionError::MissingRawText);
        }

        self.ensure_model_available().await?;

        let reply = self
            .model
            .generate(&prompt.render(raw_text))
            .await
            .map_err(ExtractionError::ModelCallFailed)?;
        debug!(chars = reply.len(), "Model replied");

        let object = parse_model_response(&reply)?;
        info!(
            model = self.model.model_name(),
            fields = object.len(),
            "Fallback extraction produced an object"
        );
        Ok(object)
    }

    async fn ensure_model_available(&self) -> Result<(), ExtractionError> {
        let wanted = normalize_model_name(self.model.model_name());
        let unavailable = |reason: String| ExtractionError::ModelUnavailable {
            model: wanted.clone(),
            reason,
        };

        let catalog = self
            .model
            .list_models()
            .await
            .map_err(|e| unavailable(format!("model listing failed: {e}")))?;

        if catalog.iter().any(|name| normalize_model_name(name) == wanted) {
            Ok(())
        } else {
            warn!(model = %wanted, served = catalog.len(), "Model not in catalog");
            Err(unavailable("not in the served model catalog".to_string()))
        }
    }
}

/// Parse the first `{` .. last `}` block of a model reply as a JSON object.
///
/// Surrounding code fences and a leading `json` label are dropped first.
pub fn parse_model_response(reply: &str) -> Result<Map<String, Value>, ExtractionError> {
    let cleaned = strip_fences(reply);

    let block = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => {
            return Err(ExtractionError::UnparsableResponse {
                reason: "no JSON object in model reply".to_string(),
            });
        }
    };

    match serde_json::from_str::<Value>(block) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(ExtractionError::UnparsableResponse {
            reason: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(ExtractionError::UnparsableResponse {
            reason: format!("JSON parse error: {e}"),
        }),
    }
}

fn strip_fences(reply: &str) -> &str {
    let text = reply.trim().trim_matches('`').trim();
    match text.get(..4) {
        Some(label) if label.eq_ignore_ascii_case("json") => text[4..].trim(),
        _ => text,
    }
}
