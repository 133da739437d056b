//! Configuration types.
//!
//! Every component receives its configuration explicitly through its
//! constructor. `AppConfig::from_env()` is the only place that reads the
//! process environment.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub virtual_host: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: SecretString::from("guest"),
            virtual_host: "/".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: env_or("RABBITMQ_HOST", &defaults.host),
            port: env_parse("RABBITMQ_PORT", defaults.port)?,
            username: env_or("RABBITMQ_USERNAME", &defaults.username),
            password: std::env::var("RABBITMQ_PASSWORD")
                .map(SecretString::from)
                .unwrap_or(defaults.password),
            virtual_host: env_or("RABBITMQ_VIRTUAL_HOST", &defaults.virtual_host),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the broker would refuse anyway.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("RABBITMQ_HOST");
        }
        if self.username.trim().is_empty() {
            missing.push("RABBITMQ_USERNAME");
        }
        if self.password.expose_secret().is_empty() {
            missing.push("RABBITMQ_PASSWORD");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired {
                key: missing.join(", "),
                hint: "Broker credentials must not be empty".to_string(),
            })
        }
    }

    /// `host:port` for log lines and errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Queue/exchange names. Topology itself is provisioned externally.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// Upstream requests for extraction.
    pub consume_queue: String,
    /// Extracted invoices bound for persistence; what `consume` reads.
    pub persistence_queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            consume_queue: "queue.for_extraction".to_string(),
            persistence_queue: "queue.for_persistence".to_string(),
            exchange: "invoice_exchange".to_string(),
            routing_key: "invoice.to.persistence".to_string(),
        }
    }
}

impl TopologyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            consume_queue: env_or("RABBITMQ_CONSUME_QUEUE", &defaults.consume_queue),
            persistence_queue: env_or("RABBITMQ_PERSISTENCE_QUEUE", &defaults.persistence_queue),
            exchange: env_or("RABBITMQ_EXCHANGE", &defaults.exchange),
            routing_key: env_or("RABBITMQ_ROUTING_KEY", &defaults.routing_key),
        }
    }

    /// Queue the invoice consumer reads: an explicit choice, else the
    /// persistence queue.
    pub fn invoice_queue(&self, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| self.persistence_queue.clone())
    }
}

/// Generative model settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl ModelConfig {
    pub const DEFAULT_MODEL: &'static str = "models/gemini-1.5-flash";
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn from_env() -> Self {
        Self {
            api_key: SecretString::from(std::env::var("GEMINI_API_KEY").unwrap_or_default()),
            model: env_or("MODEL_NAME", Self::DEFAULT_MODEL),
            base_url: env_or("GEMINI_BASE_URL", Self::DEFAULT_BASE_URL),
        }
    }
}

/// Where attachments and the prompt template live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub attach_dir: PathBuf,
    pub prompt_path: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            attach_dir: PathBuf::from(env_or("ATTACH_DIR", "storage/attachments")),
            prompt_path: PathBuf::from(env_or(
                "EXTRACT_PROMPT_PATH",
                "prompts/extract_prompt.yaml",
            )),
        }
    }
}

/// Process-level service settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub bind_addr: String,
    pub log_level: String,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            name: env_or("SERVICE_NAME", "ms2_extractor"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:5003"),
            log_level: env_or("LOG_LEVEL", "info").to_lowercase(),
        }
    }
}

/// Everything the binary needs, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub broker: BrokerConfig,
    pub topology: TopologyConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service: ServiceConfig::from_env(),
            broker: BrokerConfig::from_env()?,
            topology: TopologyConfig::from_env(),
            model: ModelConfig::from_env(),
            storage: StorageConfig::from_env(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
