use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use appledger_core::{Money, ReceiptDocument};
use appledger_rules::MatchOutcome;
use appledger_ynab::TransactionPlan;
use chrono::{NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    DryRun,
    Created,
    Duplicate,
    Failed,
    /// Email mode found no receipts to process.
    Noop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub matched: usize,
    pub fallback: usize,
    pub unmapped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub name: String,
    pub rule_id: String,
    pub payee: String,
    pub category_id: String,
    pub base: String,
    pub tax: String,
    pub total: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub base: String,
    pub tax: String,
    pub grand: String,
    pub reconciled: bool,
}

/// One structured entry per processed receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunLog {
    pub mode: RunMode,
    pub source: String,
    pub receipt_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub counts: Counts,
    pub unmapped: Vec<String>,
    pub lines: Vec<LogLine>,
    pub totals: Option<Totals>,
    pub outcome: Outcome,
    pub transaction_id: Option<String>,
    pub import_id: Option<String>,
    pub error: Option<String>,
}

impl RunLog {
    pub fn new(mode: RunMode, source: impl Into<String>) -> Self {
        RunLog {
            mode,
            source: source.into(),
            receipt_id: None,
            date: None,
            currency: None,
            counts: Counts::default(),
            unmapped: Vec::new(),
            lines: Vec::new(),
            totals: None,
            outcome: Outcome::Failed,
            transaction_id: None,
            import_id: None,
            error: None,
        }
    }

    pub fn record_receipt(&mut self, receipt: &ReceiptDocument) {
        self.receipt_id = Some(receipt.receipt_id.clone());
        self.date = Some(receipt.date);
        self.currency = Some(receipt.currency.clone());
    }

    pub fn record_matches(&mut self, outcome: &MatchOutcome) {
        let fallback = outcome.fallback_count();
        self.counts = Counts {
            matched: outcome.matched.len() - fallback,
            fallback,
            unmapped: outcome.unmapped.len(),
        };
        self.unmapped = outcome.unmapped.clone();
    }

    pub fn record_plan(&mut self, plan: &TransactionPlan) {
        let lines = plan.lines();
        self.lines = lines
            .iter()
            .map(|l| LogLine {
                name: l.item.subscription_name.clone(),
                rule_id: l.rule_id.clone(),
                payee: l.payee_name.clone(),
                category_id: l.category_id.clone(),
                base: l.item.amount.to_string(),
                tax: l.allocated_tax.to_string(),
                total: l.total().to_string(),
            })
            .collect();

        let base: Money = lines.iter().map(|l| l.item.amount).sum();
        let tax: Money = lines.iter().map(|l| l.allocated_tax).sum();
        let grand = base + tax;
        self.totals = Some(Totals {
            base: base.to_string(),
            tax: tax.to_string(),
            grand: grand.to_string(),
            reconciled: grand == plan.amount,
        });
        self.import_id = Some(plan.import_id());
    }

    pub fn fail(&mut self, error: &impl ToString) {
        self.outcome = Outcome::Failed;
        self.error = Some(error.to_string());
    }
}

#[derive(Serialize)]
struct Stamped<'a> {
    timestamp: String,
    #[serde(flatten)]
    entry: &'a RunLog,
}

/// Where run log entries go: an append-only file, stdout, or both.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: Option<PathBuf>,
    echo_stdout: bool,
}

impl LogSink {
    /// Dry runs always echo to stdout; live runs only when no file is configured.
    pub fn new(path: Option<PathBuf>, dry_run: bool) -> Self {
        let echo_stdout = dry_run || path.is_none();
        LogSink { path, echo_stdout }
    }

    pub fn write(&self, entry: &RunLog, stdout: &mut impl Write) -> io::Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let line = serde_json::to_string(&Stamped {
                timestamp: Utc::now().to_rfc3339(),
                entry,
            })?;
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{line}")?;
        }
        if self.echo_stdout {
            writeln!(stdout, "{}", serde_json::to_string(entry)?)?;
        }
        Ok(())
    }
}
