//! Attachment sources: pure I/O, no format policy.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use serde::Serialize;
use tracing::debug;

use crate::error::AttachmentError;

/// Attachment formats the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentFormat {
    Xml,
    Pdf,
}

impl AttachmentFormat {
    /// File extension and MIME subtype.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for AttachmentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Raw attachment lookup by document identifier.
///
/// `Ok(None)` means "no such attachment"; `Err` means the store itself
/// could not answer.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn lookup(
        &self,
        id: &str,
        format: AttachmentFormat,
    ) -> Result<Option<Vec<u8>>, AttachmentError>;
}

/// Attachments saved as `<root>/<id>.xml` / `<root>/<id>.pdf` by the mail fetcher.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl AttachmentStore for DirectoryStore {
    async fn lookup(
        &self,
        id: &str,
        format: AttachmentFormat,
    ) -> Result<Option<Vec<u8>>, AttachmentError> {
        check_identifier(id)?;
        let path = self.root.join(format!("{id}.{}", format.extension()));
        read_optional(id, &path).await
    }
}

/// Raw messages saved as `<root>/<id>.eml`; attachments are pulled out of
/// the MIME tree on demand.
#[derive(Debug, Clone)]
pub struct MailboxStore {
    root: PathBuf,
}

impl MailboxStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AttachmentStore for MailboxStore {
    async fn lookup(
        &self,
        id: &str,
        format: AttachmentFormat,
    ) -> Result<Option<Vec<u8>>, AttachmentError> {
        check_identifier(id)?;
        let path = self.root.join(format!("{id}.eml"));
        let Some(raw) = read_optional(id, &path).await? else {
            return Ok(None);
        };

        let message = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| AttachmentError::Lookup {
                id: id.to_string(),
                reason: format!("{} is not a parsable message", path.display()),
            })?;

        let found = message
            .attachments()
            .find(|part| part_matches(part, format))
            .map(|part| part.contents().to_vec());

        debug!(
            email_id = id,
            format = %format,
            found = found.is_some(),
            "Searched message attachments"
        );
        Ok(found)
    }
}

fn part_matches(part: &mail_parser::MessagePart<'_>, format: AttachmentFormat) -> bool {
    let ext = format.extension();
    let by_type = part
        .content_type()
        .and_then(|ct| ct.subtype())
        .is_some_and(|subtype| subtype.eq_ignore_ascii_case(ext));
    let by_name = part
        .attachment_name()
        .is_some_and(|name| name.to_lowercase().ends_with(&format!(".{ext}")));
    by_type || by_name
}

/// Identifiers become file names; anything that could escape the root is refused.
fn check_identifier(id: &str) -> Result<(), AttachmentError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(AttachmentError::Lookup {
            id: id.to_string(),
            reason: "identifier is not a valid file name".to_string(),
        });
    }
    Ok(())
}

async fn read_optional(id: &str, path: &Path) -> Result<Option<Vec<u8>>, AttachmentError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AttachmentError::Lookup {
            id: id.to_string(),
            reason: format!("{}: {e}", path.display()),
        }),
    }
}
