//! Gemini backend: completions through rig's Gemini provider, the model
//! catalog (`models.list`) over plain HTTP.

use async_trait::async_trait;
use reqwest::StatusCode;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::AssistantContent;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{EXTRACTION_TEMPERATURE, GenerativeModel, normalize_model_name};
use crate::config::ModelConfig;
use crate::error::LlmError;

const PROVIDER: &str = "gemini";

/// Bridges a rig completion model to [`GenerativeModel`].
pub struct GeminiModel<M> {
    completion: M,
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    models_url: String,
}

impl<M: CompletionModel> GeminiModel<M> {
    pub fn new(completion: M, config: &ModelConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            completion,
            client,
            api_key: config.api_key.clone(),
            model: normalize_model_name(&config.model),
            models_url: models_endpoint(&config.base_url),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let response = request
            .header("x-goog-api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: format!("HTTP {status}: {body}"),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

fn models_endpoint(base_url: &str) -> String {
    format!("{}/models", base_url.trim_end_matches('/'))
}

/// rig addresses Gemini models without the catalog's `models/` prefix.
pub fn completion_model_id(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix("models/").unwrap_or(name)
}

fn completion_text<'a>(
    parts: impl IntoIterator<Item = &'a AssistantContent>,
) -> Result<String, LlmError> {
    let text: String = parts
        .into_iter()
        .filter_map(|part| match part {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect();

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "response has no text candidate".to_string(),
        });
    }
    Ok(text.trim().to_string())
}

fn completion_error(e: CompletionError) -> LlmError {
    match e {
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason,
        },
        e => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        },
    }
}

#[async_trait]
impl<M> GenerativeModel for GeminiModel<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = &self.models_url;
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(url).query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ListModelsResponse =
                self.send(request)
                    .await?
                    .json()
                    .await
                    .map_err(|e| LlmError::InvalidResponse {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    })?;

            names.extend(page.models.into_iter().map(|m| m.name));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = names.len(), "Listed Gemini models");
        Ok(names)
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .completion
            .completion_request(prompt)
            .temperature(f64::from(EXTRACTION_TEMPERATURE))
            .send()
            .await
            .map_err(completion_error)?;

        completion_text(response.choice.iter())
    }
}
