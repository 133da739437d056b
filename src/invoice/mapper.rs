//! XML e-invoice → `InvoiceRecord`.
//!
//! Pure traversal: no I/O, same input always yields the same record.
//! Layout of the source document:
//!
//! ```text
//! HDon/DLHDon/TTChung            header (THDon, SHDon, KHMSHDon, KHHDon, NLap, DVTTe)
//! HDon/DLHDon/NDHDon/NBan        vendor (MST, Ten, DChi)
//! HDon/DLHDon/NDHDon/NMua        buyer
//! HDon/DLHDon/NDHDon/DSHHDVu/HHDVu        line items
//! HDon/DLHDon/NDHDon/DSHHDVu/HHDVu/TTKhac/TTin   auxiliary entries per item
//! HDon/DLHDon/NDHDon/TToan       totals (TgTCThue, TgTThue, TgTTTBSo)
//! ```

use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::MappingError;
use crate::invoice::model::{DEFAULT_CURRENCY, InvoiceRecord, LineItem, Party};
use crate::invoice::xml_node::XmlNode;

/// Auxiliary entry label carrying a tax amount.
pub const TAX_AMOUNT_LABEL: &str = "Tiền thuế";

/// Auxiliary entry label carrying the after-tax amount and promotion marker.
pub const AFTER_TAX_LABEL: &str = "TTMR";

/// `KM` values that mark a line as promotional.
const PROMOTION_VALUES: [&str; 3] = ["1", "True", "true"];

/// Maps e-invoice XML text to the canonical record.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlInvoiceMapper;

impl XmlInvoiceMapper {
    pub fn new() -> Self {
        Self
    }

    /// Parse and map one document.
    ///
    /// Fails only on malformed markup or a present-but-non-numeric amount;
    /// every absent node reads as empty text or zero.
    pub fn map(&self, xml: &str) -> Result<InvoiceRecord, MappingError> {
        let doc = XmlNode::parse(xml)?;

        let invoice_data = doc.path(&["HDon", "DLHDon"]);
        let general = invoice_data.child("TTChung");
        let content = invoice_data.child("NDHDon");
        let totals = content.child("TToan");

        let items = content
            .path(&["DSHHDVu", "HHDVu"])
            .items()
            .into_iter()
            .map(map_line_item)
            .collect::<Result<Vec<_>, _>>()?;

        let record = InvoiceRecord {
            invoice_type: text(general, "THDon"),
            vendor: map_party(content.child("NBan")),
            buyer: map_party(content.child("NMua")),
            invoice_number: text(general, "SHDon"),
            template_code: text(general, "KHMSHDon"),
            invoice_series: text(general, "KHHDon"),
            issued_date: text(general, "NLap"),
            currency_code: general.child("DVTTe").text_or(DEFAULT_CURRENCY).to_string(),
            total_amount_before_vat: decimal(totals.child("TgTCThue"), "TgTCThue")?,
            total_vat_amount: decimal(totals.child("TgTThue"), "TgTThue")?,
            total_amount_after_vat: decimal(totals.child("TgTTTBSo"), "TgTTTBSo")?,
            items,
        };

        debug!(
            invoice_number = %record.invoice_number,
            items = record.items.len(),
            "Mapped XML invoice"
        );
        Ok(record)
    }
}

fn map_party(node: &XmlNode) -> Party {
    Party {
        tax_code: text(node, "MST"),
        name: text(node, "Ten"),
        address: text(node, "DChi"),
    }
}

fn map_line_item(node: &XmlNode) -> Result<LineItem, MappingError> {
    let mut vat_amount = Decimal::ZERO;
    let mut amount_after_vat = Decimal::ZERO;
    let mut promotion_flag = false;

    for entry in node.path(&["TTKhac", "TTin"]).items() {
        let label = entry.child("TTruong").text();
        let data = entry.child("DLieu");

        match label {
            TAX_AMOUNT_LABEL if data.is_text() => {
                vat_amount =
                    accumulate(vat_amount, decimal(data, TAX_AMOUNT_LABEL)?, "vat_amount")?;
            }
            AFTER_TAX_LABEL if data.is_element() => {
                amount_after_vat = accumulate(
                    amount_after_vat,
                    decimal(data.child("TTST"), "TTST")?,
                    "amount_after_vat",
                )?;
                let marker = data.child("KM").text_or("0").trim();
                if PROMOTION_VALUES.contains(&marker) {
                    promotion_flag = true;
                }
            }
            _ => {}
        }
    }

    let vat_rate = node.child("TSuat").text();
    let vat_rate = vat_rate.trim().trim_end_matches('%');

    Ok(LineItem {
        product_code: text(node, "MHHDVu"),
        product_name: text(node, "THHDVu"),
        unit_name: text(node, "DVTinh"),
        quantity: decimal(node.child("SLuong"), "SLuong")?,
        unit_price: decimal(node.child("DGia"), "DGia")?,
        amount_before_vat: decimal(node.child("ThTien"), "ThTien")?,
        vat_rate: parse_decimal(vat_rate, "TSuat")?,
        vat_amount,
        amount_after_vat,
        promotion_flag,
    })
}

fn text(node: &XmlNode, name: &str) -> String {
    node.child(name).text().to_string()
}

fn decimal(node: &XmlNode, field: &str) -> Result<Decimal, MappingError> {
    parse_decimal(node.text(), field)
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, MappingError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| MappingError::InvalidNumber {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

fn accumulate(total: Decimal, value: Decimal, field: &str) -> Result<Decimal, MappingError> {
    total
        .checked_add(value)
        .ok_or_else(|| MappingError::Overflow {
            field: field.to_string(),
        })
}
