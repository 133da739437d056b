//! Attachment resolution: XML first, PDF as fallback.

pub mod pdf;
pub mod store;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::AttachmentError;

pub use store::{AttachmentFormat, AttachmentStore, DirectoryStore, MailboxStore};

/// UTF-8 byte-order mark.
const BOM: char = '\u{feff}';

/// Outcome of resolving a document identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found {
        format: AttachmentFormat,
        content: String,
    },
    /// Neither format exists. Normal outcome, not a failure.
    NotFound,
}

/// Picks the raw source to extract from for a document identifier.
#[derive(Clone)]
pub struct AttachmentResolver {
    store: Arc<dyn AttachmentStore>,
}

impl AttachmentResolver {
    pub fn new(store: Arc<dyn AttachmentStore>) -> Self {
        Self { store }
    }

    /// Resolve `id` to XML text if usable, otherwise to first-page PDF text.
    ///
    /// A failed XML lookup still falls through to PDF. If the PDF is absent
    /// too, the XML failure is returned instead of `NotFound`.
    pub async fn resolve(&self, id: &str) -> Result<Resolution, AttachmentError> {
        let xml_failure = match self.store.lookup(id, AttachmentFormat::Xml).await {
            Ok(Some(bytes)) => match decode_xml(&bytes) {
                Ok(Some(content)) => {
                    info!(email_id = id, bytes = bytes.len(), "Resolved XML attachment");
                    return Ok(Resolution::Found {
                        format: AttachmentFormat::Xml,
                        content,
                    });
                }
                Ok(None) => {
                    warn!(email_id = id, "XML attachment is empty, trying PDF");
                    None
                }
                Err(reason) => {
                    warn!(email_id = id, %reason, "XML attachment unreadable, trying PDF");
                    Some(AttachmentError::Lookup {
                        id: id.to_string(),
                        reason,
                    })
                }
            },
            Ok(None) => {
                debug!(email_id = id, "No XML attachment, trying PDF");
                None
            }
            Err(e) => {
                warn!(email_id = id, error = %e, "XML lookup failed, trying PDF");
                Some(e)
            }
        };

        match self.store.lookup(id, AttachmentFormat::Pdf).await? {
            Some(bytes) => {
                let content = extract_pdf_text(id, bytes).await?;
                info!(
                    email_id = id,
                    chars = content.chars().count(),
                    "Resolved PDF attachment"
                );
                Ok(Resolution::Found {
                    format: AttachmentFormat::Pdf,
                    content,
                })
            }
            None => match xml_failure {
                Some(e) => Err(e),
                None => {
                    info!(email_id = id, "No XML or PDF attachment found");
                    Ok(Resolution::NotFound)
                }
            },
        }
    }
}

/// Decode XML bytes as UTF-8 text without a BOM. `None` when blank.
fn decode_xml(bytes: &[u8]) -> Result<Option<String>, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {e}"))?;
    let text = text.trim().trim_start_matches(BOM).trim();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text.to_string()))
    }
}

async fn extract_pdf_text(id: &str, bytes: Vec<u8>) -> Result<String, AttachmentError> {
    let pdf_error = |reason: String| AttachmentError::Pdf {
        id: id.to_string(),
        reason,
    };
    tokio::task::spawn_blocking(move || pdf::first_page_text(&bytes))
        .await
        .map_err(|e| pdf_error(e.to_string()))?
        .map_err(pdf_error)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;

    /// In-memory store; `broken` formats fail the lookup.
    #[derive(Default)]
    struct MemoryStore {
        files: HashMap<AttachmentFormat, Vec<u8>>,
        broken: Vec<AttachmentFormat>,
    }

    #[async_trait]
    impl AttachmentStore for MemoryStore {
        async fn lookup(
            &self,
            id: &str,
            format: AttachmentFormat,
        ) -> Result<Option<Vec<u8>>, AttachmentError> {
            if self.broken.contains(&format) {
                return Err(AttachmentError::Lookup {
                    id: id.to_string(),
                    reason: "disk on fire".into(),
                });
            }
            Ok(self.files.get(&format).cloned())
        }
    }

    fn resolver(store: MemoryStore) -> AttachmentResolver {
        AttachmentResolver::new(Arc::new(store))
    }

    fn pdf_bytes() -> Vec<u8> {
        pdf::tests::make_test_pdf("Invoice from PDF")
    }

    #[tokio::test]
    async fn prefers_xml() {
        let mut store = MemoryStore::default();
        store.files.insert(AttachmentFormat::Xml, b"<HDon/>".to_vec());
        store.files.insert(AttachmentFormat::Pdf, pdf_bytes());

        let resolution = resolver(store).resolve("m1").await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Found {
                format: AttachmentFormat::Xml,
                content: "<HDon/>".into()
            }
        );
    }

    #[tokio::test]
    async fn strips_bom_and_whitespace() {
        let mut store = MemoryStore::default();
        store
            .files
            .insert(AttachmentFormat::Xml, "\u{feff}  <HDon/>\n".as_bytes().to_vec());

        match resolver(store).resolve("m1").await.unwrap() {
            Resolution::Found { content, .. } => assert_eq!(content, "<HDon/>"),
            other => panic!("Expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pdf_only_resolves_to_pdf() {
        let mut store = MemoryStore::default();
        store.files.insert(AttachmentFormat::Pdf, pdf_bytes());

        match resolver(store).resolve("m1").await.unwrap() {
            Resolution::Found { format, content } => {
                assert_eq!(format, AttachmentFormat::Pdf);
                assert!(content.contains("Invoice"));
            }
            other => panic!("Expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_xml_falls_back_to_pdf() {
        let mut store = MemoryStore::default();
        store.files.insert(AttachmentFormat::Xml, b"  \n ".to_vec());
        store.files.insert(AttachmentFormat::Pdf, pdf_bytes());

        match resolver(store).resolve("m1").await.unwrap() {
            Resolution::Found { format, .. } => assert_eq!(format, AttachmentFormat::Pdf),
            other => panic!("Expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nothing_found_is_not_an_error() {
        let resolution = resolver(MemoryStore::default()).resolve("m1").await.unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn failed_xml_lookup_still_tries_pdf() {
        let mut store = MemoryStore::default();
        store.broken.push(AttachmentFormat::Xml);
        store.files.insert(AttachmentFormat::Pdf, pdf_bytes());

        match resolver(store).resolve("m1").await.unwrap() {
            Resolution::Found { format, .. } => assert_eq!(format, AttachmentFormat::Pdf),
            other => panic!("Expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_xml_lookup_without_pdf_is_reported() {
        let mut store = MemoryStore::default();
        store.broken.push(AttachmentFormat::Xml);

        let err = resolver(store).resolve("m1").await.unwrap_err();
        assert!(matches!(err, AttachmentError::Lookup { .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_xml_without_pdf_is_reported() {
        let mut store = MemoryStore::default();
        store.files.insert(AttachmentFormat::Xml, vec![0xff, 0xfe, 0x00]);

        let err = resolver(store).resolve("m1").await.unwrap_err();
        assert!(matches!(err, AttachmentError::Lookup { .. }));
    }

    #[tokio::test]
    async fn corrupt_pdf_is_a_pdf_error() {
        let mut store = MemoryStore::default();
        store.files.insert(AttachmentFormat::Pdf, b"%PDF-garbage".to_vec());

        let err = resolver(store).resolve("m1").await.unwrap_err();
        assert!(matches!(err, AttachmentError::Pdf { .. }));
    }
}
