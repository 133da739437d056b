//! Generative model boundary.
//!
//! The pipeline only needs two things from a model backend: its catalog
//! (to refuse a model that is not served) and a single prompt → text call.
//! `GenerativeModel` is that seam; `GeminiModel` implements it on top of
//! rig-core's Gemini provider.

pub mod gemini;
pub mod prompt;

pub use gemini::GeminiModel;
pub use prompt::ExtractionPrompt;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::ModelConfig;
use crate::error::LlmError;

/// Sampling temperature for extraction calls.
pub const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// A text-generation backend.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Configured model name, in `models/<name>` form.
    fn model_name(&self) -> &str;

    /// Names of the models the backend currently serves.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    /// One completion for `prompt`. No retries, no streaming.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Create the model backend from configuration.
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn GenerativeModel>, LlmError> {
    create_gemini_provider(config)
}

fn create_gemini_provider(config: &ModelConfig) -> Result<Arc<dyn GenerativeModel>, LlmError> {
    use rig::providers::gemini;

    let client: gemini::Client =
        gemini::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("Failed to create Gemini client: {}", e),
            }
        })?;

    let completion = client.completion_model(self::gemini::completion_model_id(&config.model));
    let model = GeminiModel::new(completion, config)?;
    tracing::info!("Using Gemini (model: {})", model.model_name());
    Ok(Arc::new(model))
}

/// Catalog names carry a `models/` prefix; configuration may omit it.
pub fn normalize_model_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with("models/") {
        name.to_string()
    } else {
        format!("models/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_names() {
        assert_eq!(normalize_model_name("gemini-1.5-flash"), "models/gemini-1.5-flash");
        assert_eq!(
            normalize_model_name(" models/gemini-1.5-pro "),
            "models/gemini-1.5-pro"
        );
    }

    #[test]
    fn create_model_accepts_any_key_at_construction() {
        // Authentication only happens on the first request.
        let config = ModelConfig {
            api_key: secrecy::SecretString::from("test-key"),
            model: "gemini-1.5-flash".into(),
            base_url: ModelConfig::DEFAULT_BASE_URL.into(),
        };
        let model = create_model(&config).unwrap();
        assert_eq!(model.model_name(), "models/gemini-1.5-flash");
    }
}
