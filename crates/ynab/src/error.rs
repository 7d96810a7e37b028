use appledger_core::Money;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Cannot build a transaction without matched lines")]
    NoLines,
    #[error("Allocated tax {allocated} does not equal the receipt tax {tax_total}")]
    TaxMismatch { allocated: Money, tax_total: Money },
    #[error("Line totals {lines} do not equal the receipt grand total {grand_total}")]
    Unbalanced { lines: Money, grand_total: Money },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("YNAB API {status}: {body}")]
    Status { status: u16, body: String },
    #[error("YNAB API reported a duplicate transaction (409): {0}")]
    Conflict(String),
    #[error("YNAB API response did not include a transaction id")]
    MissingTransactionId,
    #[error("Receipt {receipt_id} is still a duplicate after {attempts} reimport attempt(s)")]
    RetriesExhausted { receipt_id: String, attempts: usize },
}
