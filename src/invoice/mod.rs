//! Invoice domain: canonical record and the XML e-invoice mapper.

pub mod mapper;
pub mod model;
pub mod xml_node;

pub use mapper::XmlInvoiceMapper;
pub use model::{ExtractedInvoice, InvoiceRecord, LineItem, Party};
