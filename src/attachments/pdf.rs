//! First-page text from a PDF attachment.

use std::panic::{AssertUnwindSafe, catch_unwind};

/// Text layer of the first page, or an empty string for a PDF without pages.
///
/// `pdf_extract` panics on some malformed inputs; the panic is turned into
/// an error so one bad attachment cannot take the service down.
pub fn first_page_text(pdf_bytes: &[u8]) -> Result<String, String> {
    let pages = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
    }))
    .map_err(|_| "PDF parser panicked".to_string())?
    .map_err(|e| e.to_string())?;

    Ok(pages.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal one-page PDF with a Helvetica text run.
    pub(crate) fn make_test_pdf(text: &str) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });

        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn extracts_first_page_text() {
        let text = first_page_text(&make_test_pdf("Invoice 0000123")).unwrap();
        assert!(text.contains("Invoice"), "got: {text}");
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(first_page_text(b"not a pdf").is_err());
    }
}
