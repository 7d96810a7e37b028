pub mod error;
pub mod html;
pub mod mime;
mod patterns;
pub mod pdf;
pub mod text;

use std::path::Path;

use appledger_core::ReceiptDocument;

pub use error::ParseError;
pub use html::{ReceiptTemplate, TemplateMatch, TEMPLATES};
pub use mime::{envelope, message_body, Envelope, MessageBody};

/// Source format of a receipt document, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Email,
    Pdf,
    Text,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Result<DocumentKind, ParseError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "eml" => Ok(DocumentKind::Email),
            "pdf" => Ok(DocumentKind::Pdf),
            "txt" => Ok(DocumentKind::Text),
            _ => Err(ParseError::UnsupportedKind(ext)),
        }
    }
}

/// Turns raw receipt bytes into a reconciled [`ReceiptDocument`].
#[derive(Debug, Clone)]
pub struct Extractor {
    default_currency: String,
}

impl Default for Extractor {
    fn default() -> Self {
        Extractor::new("USD")
    }
}

impl Extractor {
    pub fn new(default_currency: impl Into<String>) -> Self {
        Extractor {
            default_currency: default_currency.into(),
        }
    }

    pub fn extract(&self, raw: &[u8], kind: DocumentKind) -> Result<ReceiptDocument, ParseError> {
        let currency = self.default_currency.as_str();
        let unreconciled = match kind {
            DocumentKind::Email => match mime::message_body(raw)? {
                MessageBody::Html(body) => html::parse_html(&body, currency)?,
                MessageBody::Plain(body) => text::parse_text(&body, currency)?,
            },
            DocumentKind::Pdf => text::parse_text(&pdf::pdf_text(raw)?, currency)?,
            DocumentKind::Text => text::parse_text(&String::from_utf8_lossy(raw), currency)?,
        };
        let receipt = ReceiptDocument::reconcile(unreconciled)?;
        tracing::info!(
            "Parsed receipt {} dated {} with {} line(s), grand total {}",
            receipt.receipt_id,
            receipt.date,
            receipt.line_items.len(),
            receipt.grand_total
        );
        Ok(receipt)
    }

    pub fn extract_file(&self, path: &Path) -> Result<ReceiptDocument, ParseError> {
        let kind = DocumentKind::from_path(path)?;
        let raw = std::fs::read(path).map_err(|e| ParseError::Io(format!("{}: {e}", path.display())))?;
        self.extract(&raw, kind)
    }
}
