use appledger_core::ReceiptError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported receipt file extension '{0}'. Use a .eml (preferred) or .pdf file.")]
    UnsupportedKind(String),
    #[error("Failed to read receipt: {0}")]
    Io(String),
    #[error("Failed to decode MIME message: {0}")]
    Mime(String),
    #[error("Email did not contain a readable text/html or text/plain body")]
    NoReadableBody,
    #[error("Failed to extract PDF text: {0}")]
    Pdf(String),
    #[error("Document text produced no usable lines")]
    EmptyDocument,
    #[error("No known receipt template matched the HTML body")]
    UnrecognizedTemplate,
    #[error("Could not identify subscription line items")]
    NoLineItems,
    #[error("Could not find the tax total")]
    MissingTax,
    #[error("Could not find the grand total")]
    MissingGrandTotal,
    #[error("Could not find an order or receipt number")]
    MissingReceiptId,
    #[error("Could not parse the receipt date")]
    MissingDate,
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}
