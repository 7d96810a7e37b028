use appledger_core::{FlagColor, Money, ReceiptDocument};
use appledger_rules::MatchedLine;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::error::BuildError;
use crate::payload::{ClearedStatus, SaveSubTransaction, SaveTransaction};

const IMPORT_ID_PREFIX: &str = "AR:";
const IMPORT_ID_HEX_LEN: usize = 32;

/// Per-budget settings the builder needs besides the matched lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub account_id: String,
    pub default_flag: Option<FlagColor>,
    /// Whether single-line transactions carry the `Receipt: <id>` memo.
    pub single_line_memo: bool,
    pub split_payee_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanBody {
    Single(MatchedLine),
    Split(Vec<MatchedLine>),
}

/// A balanced transaction ready to be turned into an API payload.
///
/// Can only be obtained through [`TransactionPlan::build`], which guarantees the
/// line totals sum to `amount` and the allocated tax to the receipt's tax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPlan {
    pub account_id: String,
    pub receipt_id: String,
    pub date: NaiveDate,
    /// Receipt grand total, positive; the outflow sign is applied on the wire.
    pub amount: Money,
    pub flag_color: Option<FlagColor>,
    pub body: PlanBody,
    single_line_memo: bool,
    split_payee_name: String,
}

impl TransactionPlan {
    pub fn build(
        receipt: &ReceiptDocument,
        mut lines: Vec<MatchedLine>,
        opts: &BuildOptions,
    ) -> Result<Self, BuildError> {
        if lines.is_empty() {
            return Err(BuildError::NoLines);
        }

        let allocated: Money = lines.iter().map(|l| l.allocated_tax).sum();
        if allocated != receipt.tax_total {
            return Err(BuildError::TaxMismatch {
                allocated,
                tax_total: receipt.tax_total,
            });
        }
        let line_total: Money = lines.iter().map(MatchedLine::total).sum();
        if line_total != receipt.grand_total {
            return Err(BuildError::Unbalanced {
                lines: line_total,
                grand_total: receipt.grand_total,
            });
        }

        let flag_color = resolve_flag(&lines, opts.default_flag);
        let body = if lines.len() == 1 {
            PlanBody::Single(lines.remove(0))
        } else {
            PlanBody::Split(lines)
        };

        Ok(TransactionPlan {
            account_id: opts.account_id.clone(),
            receipt_id: receipt.receipt_id.clone(),
            date: receipt.date,
            amount: receipt.grand_total,
            flag_color,
            body,
            single_line_memo: opts.single_line_memo,
            split_payee_name: opts.split_payee_name.clone(),
        })
    }

    /// The same plan under a different receipt id; memo and import id follow.
    pub fn with_receipt_id(&self, receipt_id: impl Into<String>) -> Self {
        TransactionPlan {
            receipt_id: receipt_id.into(),
            ..self.clone()
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self.body, PlanBody::Split(_))
    }

    pub fn lines(&self) -> &[MatchedLine] {
        match &self.body {
            PlanBody::Single(line) => std::slice::from_ref(line),
            PlanBody::Split(lines) => lines,
        }
    }

    pub fn memo(&self) -> Option<String> {
        match self.body {
            PlanBody::Single(_) if !self.single_line_memo => None,
            _ => Some(format!("Receipt: {}", self.receipt_id)),
        }
    }

    /// Signed wire amount in milliunits.
    pub fn amount_milliunits(&self) -> i64 {
        -self.amount.to_milliunits()
    }

    pub fn import_id(&self) -> String {
        import_id(&self.receipt_id, self.date, self.amount_milliunits())
    }

    pub fn to_payload(&self) -> SaveTransaction {
        let (payee_name, category_id, subtransactions) = match &self.body {
            PlanBody::Single(line) => (line.payee_name.clone(), Some(line.category_id.clone()), Vec::new()),
            PlanBody::Split(lines) => (
                self.split_payee_name.clone(),
                None,
                lines
                    .iter()
                    .map(|l| SaveSubTransaction {
                        amount: -l.total().to_milliunits(),
                        payee_name: l.payee_name.clone(),
                        category_id: Some(l.category_id.clone()),
                    })
                    .collect(),
            ),
        };

        SaveTransaction {
            account_id: self.account_id.clone(),
            date: self.date,
            amount: self.amount_milliunits(),
            payee_name: Some(payee_name),
            category_id,
            memo: self.memo(),
            cleared: ClearedStatus::Cleared,
            approved: false,
            flag_color: self.flag_color,
            import_id: self.import_id(),
            subtransactions,
        }
    }
}

/// Fallback colour when any line fell back and one is configured, else the default,
/// else the first rule colour in line order.
fn resolve_flag(lines: &[MatchedLine], default_flag: Option<FlagColor>) -> Option<FlagColor> {
    let fallback = lines
        .iter()
        .filter(|l| l.used_fallback)
        .find_map(|l| l.flag_color);
    let rule = lines
        .iter()
        .filter(|l| !l.used_fallback)
        .find_map(|l| l.flag_color);
    fallback.or(default_flag).or(rule)
}

/// `AR:` plus the first 32 hex digits of SHA-256 over `receipt_id|date|amount`.
/// Fits the API's 36-character limit.
pub fn import_id(receipt_id: &str, date: NaiveDate, amount_milliunits: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{receipt_id}|{date}|{amount_milliunits}").as_bytes());
    let hash: [u8; 32] = hasher.finalize().into();
    let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
    format!("{IMPORT_ID_PREFIX}{}", &hex[..IMPORT_ID_HEX_LEN])
}
