//! Extraction instruction template, loaded from a YAML file.
//!
//! ```yaml
//! extractor_instruction: |
//!   You are an invoice extraction engine...
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ExtractionError;

#[derive(Debug, Deserialize)]
struct PromptFile {
    extractor_instruction: Option<String>,
}

/// The instruction prepended to raw invoice text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPrompt {
    instruction: String,
}

impl ExtractionPrompt {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    /// Load the template. Any failure means the instruction is unavailable.
    pub async fn load(path: &Path) -> Result<Self, ExtractionError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ExtractionError::MissingInstruction(format!("{}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ExtractionError> {
        let file: PromptFile = serde_yaml::from_str(raw)
            .map_err(|e| ExtractionError::MissingInstruction(format!("invalid YAML: {e}")))?;

        match file.extractor_instruction {
            Some(instruction) if !instruction.trim().is_empty() => Ok(Self::new(instruction)),
            _ => Err(ExtractionError::MissingInstruction(
                "extractor_instruction is empty or missing".to_string(),
            )),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Single prompt: instruction followed by the invoice text.
    pub fn render(&self, raw_text: &str) -> String {
        format!("{}\n  Here's the invoice:\n{}", self.instruction, raw_text)
    }
}
