//! Error types for the invoice extractor.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Attachment lookup failures.
///
/// A missing attachment is not an error: the resolver reports it as
/// `Resolution::NotFound`.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("Attachment lookup failed for {id}: {reason}")]
    Lookup { id: String, reason: String },

    #[error("PDF parsing failed for {id}: {reason}")]
    Pdf { id: String, reason: String },
}

/// XML-to-record mapping failures.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Malformed XML: {0}")]
    Parse(String),

    #[error("Invalid number in {field}: '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("Sum of {field} exceeds the decimal range")]
    Overflow { field: String },
}

/// Fallback (model-driven) extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction instruction unavailable: {0}")]
    MissingInstruction(String),

    #[error("No extractable text in attachment")]
    MissingRawText,

    #[error("Model {model} is not available: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("Model call failed: {0}")]
    ModelCallFailed(#[source] LlmError),

    #[error("Unparsable model response: {reason}")]
    UnparsableResponse { reason: String },
}

/// Model boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Message broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Cannot connect to broker at {endpoint}: {reason}")]
    Connectivity { endpoint: String, reason: String },

    #[error("Queue '{queue}' does not exist: {reason}")]
    Topology { queue: String, reason: String },

    #[error("Publish to exchange '{exchange}' with routing key '{routing_key}' failed: {reason}")]
    Delivery {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("Channel operation {operation} failed: {reason}")]
    Channel { operation: String, reason: String },

    #[error("Broker connection is not open")]
    NotConnected,
}

/// Malformed upstream requests.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Attachment resolution failed: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("XML mapping failed: {0}")]
    Mapping(#[from] MappingError),

    #[error("Fallback extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker hand-off failed: {0}")]
    Broker(#[from] BrokerError),
}
