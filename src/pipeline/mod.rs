//! Extraction pipeline.
//!
//! Every run flows through:
//! 1. `AttachmentResolver::resolve()`: XML first, PDF fallback
//! 2. `XmlInvoiceMapper::map()` for XML, `FallbackExtractor::extract()` for PDF
//! 3. `MessagePublisher::publish()` to the configured exchange
//!
//! A missing attachment ends the run early without publishing.

pub mod coordinator;
pub mod fallback;

pub use coordinator::{InvoicePipeline, PipelineOutcome};
pub use fallback::{FallbackExtractor, parse_model_response};
