//! Request and response bodies of the YNAB transactions endpoints.

use appledger_core::FlagColor;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearedStatus {
    Cleared,
    Uncleared,
    Reconciled,
}

/// A new transaction. Amounts are milliunits; outflows are negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTransaction {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,
    /// Serialised as `null` on split parents.
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub cleared: ClearedStatus,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_color: Option<FlagColor>,
    pub import_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtransactions: Vec<SaveSubTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSubTransaction {
    pub amount: i64,
    pub payee_name: String,
    pub category_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PostTransactionWrapper<'a> {
    pub transaction: &'a SaveTransaction,
}

/// The fields of an existing transaction needed to spot a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: i64,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub import_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransactionsData {
    pub transactions: Vec<ExistingTransaction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedTransactionData {
    #[serde(default)]
    pub transaction_ids: Vec<String>,
    #[serde(default)]
    pub transaction: Option<CreatedTransaction>,
    #[serde(default)]
    pub duplicate_import_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedTransaction {
    pub id: String,
}
