use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::money::Money;

/// One subscription charge row, pre-tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub subscription_name: String,
    pub amount: Money,
}

impl LineItem {
    pub fn new(subscription_name: impl Into<String>, amount: Money) -> Self {
        LineItem {
            subscription_name: subscription_name.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("Receipt has no line items")]
    NoLineItems,
    #[error("Receipt totals do not reconcile: items={items} + tax={tax} != grand total={grand_total}")]
    Unreconciled {
        items: Money,
        tax: Money,
        grand_total: Money,
    },
    #[error("Negative amount for '{0}'")]
    NegativeAmount(String),
    #[error("Negative tax total: {0}")]
    NegativeTax(Money),
}

/// Fields pulled out of a document before the totals have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreconciledReceipt {
    pub receipt_id: String,
    pub date: NaiveDate,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub tax_total: Money,
    pub grand_total: Money,
}

impl UnreconciledReceipt {
    pub fn items_total(&self) -> Money {
        self.line_items.iter().map(|l| l.amount).sum()
    }
}

/// A parsed receipt whose grand total equals the item sum plus tax to the cent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDocument {
    pub receipt_id: String,
    pub date: NaiveDate,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub tax_total: Money,
    pub grand_total: Money,
}

impl ReceiptDocument {
    pub fn reconcile(raw: UnreconciledReceipt) -> Result<ReceiptDocument, ReceiptError> {
        if raw.line_items.is_empty() {
            return Err(ReceiptError::NoLineItems);
        }
        if let Some(item) = raw.line_items.iter().find(|l| l.amount.is_negative()) {
            return Err(ReceiptError::NegativeAmount(item.subscription_name.clone()));
        }
        if raw.tax_total.is_negative() {
            return Err(ReceiptError::NegativeTax(raw.tax_total));
        }

        let items = raw.items_total();
        if items + raw.tax_total != raw.grand_total {
            return Err(ReceiptError::Unreconciled {
                items,
                tax: raw.tax_total,
                grand_total: raw.grand_total,
            });
        }

        Ok(ReceiptDocument {
            receipt_id: raw.receipt_id,
            date: raw.date,
            currency: raw.currency,
            line_items: raw.line_items,
            tax_total: raw.tax_total,
            grand_total: raw.grand_total,
        })
    }

    pub fn items_total(&self) -> Money {
        self.line_items.iter().map(|l| l.amount).sum()
    }
}
