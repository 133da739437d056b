//! One extraction run: resolve → map or extract → publish.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::attachments::{AttachmentFormat, AttachmentResolver, Resolution};
use crate::broker::{BrokerConnector, MessagePublisher};
use crate::config::{BrokerConfig, TopologyConfig};
use crate::error::{BrokerError, PipelineError, ValidationError};
use crate::invoice::{ExtractedInvoice, XmlInvoiceMapper};
use crate::llm::ExtractionPrompt;
use crate::pipeline::fallback::FallbackExtractor;

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No XML or PDF attachment exists for the id. Nothing was published.
    NoAttachment,
    Published {
        format: AttachmentFormat,
        invoice: ExtractedInvoice,
    },
}

/// Sequences the resolver, the extractors and the publisher.
///
/// Each run opens its own broker connection and closes it before
/// returning, so concurrent runs never share a channel.
pub struct InvoicePipeline {
    resolver: AttachmentResolver,
    mapper: XmlInvoiceMapper,
    fallback: FallbackExtractor,
    prompt_path: PathBuf,
    connector: Arc<dyn BrokerConnector>,
    broker: BrokerConfig,
    topology: TopologyConfig,
}

impl InvoicePipeline {
    pub fn new(
        resolver: AttachmentResolver,
        fallback: FallbackExtractor,
        prompt_path: impl Into<PathBuf>,
        connector: Arc<dyn BrokerConnector>,
        broker: BrokerConfig,
        topology: TopologyConfig,
    ) -> Self {
        Self {
            resolver,
            mapper: XmlInvoiceMapper::new(),
            fallback,
            prompt_path: prompt_path.into(),
            connector,
            broker,
            topology,
        }
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    pub async fn run(&self, email_id: &str) -> Result<PipelineOutcome, PipelineError> {
        let email_id = email_id.trim();
        if email_id.is_empty() {
            return Err(ValidationError::MissingField("email_id".to_string()).into());
        }

        let (format, content) = match self.resolver.resolve(email_id).await {
            Ok(Resolution::Found { format, content }) => (format, content),
            Ok(Resolution::NotFound) => {
                warn!(email_id, "No XML or PDF attachment found; skipping");
                return Ok(PipelineOutcome::NoAttachment);
            }
            Err(e) => {
                error!(email_id, error = %e, "Attachment resolution failed");
                return Err(e.into());
            }
        };

        let invoice = self
            .extract(format, &content)
            .await
            .inspect_err(|e| error!(email_id, %format, error = %e, "Extraction failed"))?;

        let body = invoice.to_message_body()?;
        self.hand_off(&body)
            .await
            .inspect_err(|e| error!(email_id, error = %e, "Hand-off to broker failed"))?;

        info!(
            email_id,
            %format,
            kind = invoice.label(),
            exchange = %self.topology.exchange,
            routing_key = %self.topology.routing_key,
            "Invoice extracted and handed off"
        );
        Ok(PipelineOutcome::Published { format, invoice })
    }

    async fn extract(
        &self,
        format: AttachmentFormat,
        content: &str,
    ) -> Result<ExtractedInvoice, PipelineError> {
        match format {
            AttachmentFormat::Xml => Ok(ExtractedInvoice::Structured(self.mapper.map(content)?)),
            AttachmentFormat::Pdf => {
                let prompt = ExtractionPrompt::load(&self.prompt_path).await?;
                let object = self.fallback.extract(content, &prompt).await?;
                Ok(ExtractedInvoice::Generated(object))
            }
        }
    }

    async fn hand_off(&self, body: &[u8]) -> Result<(), BrokerError> {
        let mut publisher = MessagePublisher::new(self.broker.clone(), Arc::clone(&self.connector));
        let published = publisher
            .publish(&self.topology.exchange, &self.topology.routing_key, body)
            .await;
        if let Err(e) = publisher.close().await {
            warn!(error = %e, "Failed to close publisher connection");
        }
        published
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::attachments::DirectoryStore;
    use crate::attachments::pdf::tests::make_test_pdf;
    use crate::broker::MemoryBroker;
    use crate::error::{ExtractionError, LlmError};
    use crate::llm::GenerativeModel;

    const INVOICE_XML: &str = r#"<HDon><DLHDon>
        <TTChung><THDon>01GTKT</THDon><SHDon>42</SHDon></TTChung>
        <NDHDon><NBan><MST>123</MST></NBan>
            <DSHHDVu><HHDVu><THHDVu>Widget</THHDVu><ThTien>100</ThTien></HHDVu></DSHHDVu>
        </NDHDon>
    </DLHDon></HDon>"#;

    struct FixedModel(&'static str);

    #[async_trait]
    impl GenerativeModel for FixedModel {
        fn model_name(&self) -> &str {
            "models/gemini-1.5-flash"
        }

        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(vec!["models/gemini-1.5-flash".into()])
        }

        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    fn pipeline(dir: &Path, broker: &MemoryBroker, prompt_path: PathBuf) -> InvoicePipeline {
        InvoicePipeline::new(
            AttachmentResolver::new(Arc::new(DirectoryStore::new(dir))),
            FallbackExtractor::new(Arc::new(FixedModel("```json\n{\"invoice_id\":\"P-1\"}\n```"))),
            prompt_path,
            Arc::new(broker.clone()),
            BrokerConfig::default(),
            TopologyConfig::default(),
        )
    }

    fn write_prompt(dir: &Path) -> PathBuf {
        let path = dir.join("prompt.yaml");
        std::fs::write(&path, "extractor_instruction: Return JSON.\n").unwrap();
        path
    }

    #[tokio::test]
    async fn blank_id_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let err = pipeline(dir.path(), &broker, write_prompt(dir.path()))
            .run("  ")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn missing_attachment_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let outcome = pipeline(dir.path(), &broker, write_prompt(dir.path()))
            .run("m-404")
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::NoAttachment);
        assert!(broker.events().is_empty());
    }

    #[tokio::test]
    async fn xml_is_mapped_published_and_connection_closed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m1.xml"), INVOICE_XML).unwrap();
        let broker = MemoryBroker::new();

        let outcome = pipeline(dir.path(), &broker, write_prompt(dir.path()))
            .run("m1")
            .await
            .unwrap();

        let PipelineOutcome::Published { format, invoice } = outcome else {
            panic!("expected Published");
        };
        assert_eq!(format, AttachmentFormat::Xml);
        assert_eq!(invoice.label(), "structured");

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "invoice_exchange");
        assert_eq!(published[0].routing_key, "invoice.to.persistence");
        let body: Value = serde_json::from_slice(&published[0].body).unwrap();
        assert_eq!(body["invoice_type"], "01GTKT");
        assert_eq!(body["vendor"]["tax_code"], "123");
        assert_eq!(body["items"][0]["product_name"], "Widget");
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn pdf_goes_through_the_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m2.pdf"), make_test_pdf("Invoice P-1 total 100")).unwrap();
        let broker = MemoryBroker::new();

        let outcome = pipeline(dir.path(), &broker, write_prompt(dir.path()))
            .run("m2")
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            PipelineOutcome::Published { format: AttachmentFormat::Pdf, .. }
        ));
        let body: Value = serde_json::from_slice(&broker.published()[0].body).unwrap();
        assert_eq!(body, serde_json::json!({"invoice_id": "P-1"}));
    }

    #[tokio::test]
    async fn missing_prompt_fails_without_publishing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m3.pdf"), make_test_pdf("Invoice")).unwrap();
        let broker = MemoryBroker::new();

        let err = pipeline(dir.path(), &broker, dir.path().join("absent.yaml"))
            .run("m3")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Extraction(ExtractionError::MissingInstruction(_))
        ));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn malformed_xml_is_a_mapping_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m4.xml"), "<HDon><DLHDon>").unwrap();
        let broker = MemoryBroker::new();

        let err = pipeline(dir.path(), &broker, write_prompt(dir.path()))
            .run("m4")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mapping(_)));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn broker_outage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m5.xml"), INVOICE_XML).unwrap();
        let broker = MemoryBroker::new().refuse_connections();

        let err = pipeline(dir.path(), &broker, write_prompt(dir.path()))
            .run("m5")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Broker(BrokerError::Connectivity { .. })
        ));
    }
}
