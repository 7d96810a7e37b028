use crate::error::ParseError;

/// Pulls the text layer out of a PDF receipt. Scanned PDFs without a text layer
/// come back empty and fail later as [`ParseError::EmptyDocument`].
pub fn pdf_text(raw: &[u8]) -> Result<String, ParseError> {
    pdf_extract::extract_text_from_mem(raw).map_err(|e| ParseError::Pdf(e.to_string()))
}
