//! Canonical invoice record produced by both extraction paths.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Currency assumed when the source invoice does not state one.
pub const DEFAULT_CURRENCY: &str = "VND";

/// Seller or buyer block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub tax_code: String,
    pub name: String,
    pub address: String,
}

/// One invoice line.
///
/// `vat_amount`, `amount_after_vat` and `promotion_flag` are not carried in
/// the line's primary fields; they are accumulated from its auxiliary
/// entries by the mapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_code: String,
    pub product_name: String,
    pub unit_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_before_vat: Decimal,
    /// Percentage, e.g. `10` for "10%".
    #[serde(with = "rust_decimal::serde::float")]
    pub vat_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub vat_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_after_vat: Decimal,
    pub promotion_flag: bool,
}

/// Normalized invoice, built fresh per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_type: String,
    pub vendor: Party,
    pub buyer: Party,
    pub invoice_number: String,
    pub template_code: String,
    pub invoice_series: String,
    pub issued_date: String,
    pub currency_code: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount_before_vat: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_vat_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount_after_vat: Decimal,
    /// Source order is preserved.
    pub items: Vec<LineItem>,
}

impl Default for InvoiceRecord {
    fn default() -> Self {
        Self {
            invoice_type: String::new(),
            vendor: Party::default(),
            buyer: Party::default(),
            invoice_number: String::new(),
            template_code: String::new(),
            invoice_series: String::new(),
            issued_date: String::new(),
            currency_code: DEFAULT_CURRENCY.to_string(),
            total_amount_before_vat: Decimal::ZERO,
            total_vat_amount: Decimal::ZERO,
            total_amount_after_vat: Decimal::ZERO,
            items: Vec::new(),
        }
    }
}

/// Output of a pipeline run, whichever path produced it.
///
/// The model-driven path yields whatever object the model returned; it is
/// forwarded as-is rather than coerced into `InvoiceRecord`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractedInvoice {
    Structured(InvoiceRecord),
    Generated(serde_json::Map<String, serde_json::Value>),
}

impl ExtractedInvoice {
    /// UTF-8 JSON message body; non-ASCII text is kept unescaped.
    pub fn to_message_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Structured(_) => "structured",
            Self::Generated(_) => "generated",
        }
    }
}
