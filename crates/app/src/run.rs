use std::path::Path;

use appledger_core::{AllocationError, ReceiptDocument};
use appledger_extract::{DocumentKind, Extractor, ParseError};
use appledger_rules::{allocate_tax, MappingError};
use appledger_ynab::{ApiError, BudgetApi, BuildError, PostOutcome, Poster, TransactionPlan};
use chrono::NaiveDate;
use thiserror::Error;

use crate::config::{ConfigError, RuntimeConfig};
use crate::runlog::{Outcome, RunLog, RunMode};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_UNMAPPED: u8 = 2;
pub const EXIT_API: u8 = 3;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("Tax allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("Transaction build failed: {0}")]
    Build(#[from] BuildError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Mapping(_) => EXIT_UNMAPPED,
            RunError::Api(_) => EXIT_API,
            _ => EXIT_FAILURE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub reimport: bool,
}

/// Result of one receipt: the log entry plus the error that stopped it, if any.
#[derive(Debug)]
pub struct RunReport {
    pub log: RunLog,
    pub error: Option<RunError>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map_or(EXIT_OK, RunError::exit_code)
    }
}

/// State threaded through every receipt of one invocation.
pub struct RunContext<A: BudgetApi> {
    config: RuntimeConfig,
    extractor: Extractor,
    poster: Poster<A>,
    dry_run: bool,
    today: NaiveDate,
}

impl<A: BudgetApi> RunContext<A> {
    pub fn new(config: RuntimeConfig, api: A, options: RunOptions, today: NaiveDate) -> Self {
        let poster = Poster::new(
            api,
            config.defaults.account_id.clone(),
            config.ynab.lookback_days,
            options.reimport,
        );
        RunContext {
            extractor: Extractor::new(config.defaults.currency.clone()),
            config,
            poster,
            dry_run: options.dry_run,
            today,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn poster(&self) -> &Poster<A> {
        &self.poster
    }

    fn mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }

    pub async fn process_file(&mut self, path: &Path) -> RunReport {
        let receipt = self.extractor.extract_file(path);
        self.finish(&path.display().to_string(), receipt).await
    }

    pub async fn process_bytes(&mut self, source: &str, raw: &[u8], kind: DocumentKind) -> RunReport {
        let receipt = self.extractor.extract(raw, kind);
        self.finish(source, receipt).await
    }

    async fn finish(&mut self, source: &str, receipt: Result<ReceiptDocument, ParseError>) -> RunReport {
        let mut log = RunLog::new(self.mode(), source);
        let result = match receipt {
            Ok(receipt) => self.run_stages(&receipt, &mut log).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => RunReport { log, error: None },
            Err(e) => {
                tracing::error!("{}: {}", source, e);
                log.fail(&e);
                RunReport { log, error: Some(e) }
            }
        }
    }

    /// match → allocate → build → duplicate check → post
    async fn run_stages(&mut self, receipt: &ReceiptDocument, log: &mut RunLog) -> Result<(), RunError> {
        log.record_receipt(receipt);

        let matched = self.config.matcher.match_items(&receipt.line_items);
        log.record_matches(&matched);
        let mut lines = matched.into_result()?;

        allocate_tax(&mut lines, receipt.tax_total)?;
        let plan = TransactionPlan::build(receipt, lines, &self.config.build_options())?;
        log.record_plan(&plan);

        if self.dry_run {
            tracing::info!("Dry run: not posting receipt {}", plan.receipt_id);
            log.outcome = Outcome::DryRun;
            return Ok(());
        }

        match self.poster.post(&plan, self.today).await? {
            PostOutcome::Created {
                transaction_id,
                receipt_id,
                import_id,
            } => {
                log.outcome = Outcome::Created;
                log.transaction_id = Some(transaction_id);
                log.receipt_id = Some(receipt_id);
                log.import_id = Some(import_id);
            }
            PostOutcome::Duplicate { existing_id, import_id } => {
                log.outcome = Outcome::Duplicate;
                log.transaction_id = Some(existing_id);
                log.import_id = Some(import_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runlog::LogSink;
    use appledger_core::FlagColor;
    use appledger_ynab::{ExistingTransaction, SaveTransaction};
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeApi {
        existing: Vec<ExistingTransaction>,
        posted: RefCell<Vec<SaveTransaction>>,
        calls: RefCell<usize>,
    }

    impl BudgetApi for FakeApi {
        async fn list_transactions(
            &self,
            _account_id: &str,
            _since: NaiveDate,
        ) -> Result<Vec<ExistingTransaction>, ApiError> {
            *self.calls.borrow_mut() += 1;
            Ok(self.existing.clone())
        }

        async fn create_transaction(&self, tx: &SaveTransaction) -> Result<String, ApiError> {
            *self.calls.borrow_mut() += 1;
            self.posted.borrow_mut().push(tx.clone());
            Ok("tx-created".into())
        }
    }

    const CONFIG: &str = r#"
version = 1

[ynab]
api_token = "t"
budget_id = "b"

[mappings.defaults]
ynab_account_id = "acct"
ynab_flag_color = "blue"

[[mappings.rules]]
id = "focus"
match = { type = "exact", value = "Focus Timer" }
ynab_category_id = "cat-focus"
ynab_payee_name = "Focus Timer"

[mappings.fallback]
ynab_category_id = "cat-misc"
ynab_payee_name = "Apple"
ynab_flag_color = "yellow"
"#;

    fn config(content: &str) -> RuntimeConfig {
        RuntimeConfig::from_toml_str(content, Path::new("config.toml"), None).unwrap()
    }

    fn eml(rows: &[(&str, &str)], tax: &str, total: &str) -> Vec<u8> {
        let items: String = rows
            .iter()
            .map(|(name, price)| {
                format!(
                    "<table class=\"subscription-lockup__container\"><tr><td><p>{name}</p></td><td><p>{price}</p></td></tr></table>"
                )
            })
            .collect();
        format!(
            "From: no_reply@email.apple.com\r\nSubject: Your receipt from Apple.\r\n\
Content-Type: text/html; charset=utf-8\r\n\r\n\
<html><body><p>January 24, 2026</p><p>Order ID:</p><p>MQ7XK2LP9</p>{items}\
<div class=\"payment-information\"><p>Tax</p><p>{tax}</p><p>Total</p><p>{total}</p></div></body></html>\r\n"
        )
        .into_bytes()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 26).unwrap()
    }

    fn dry() -> RunOptions {
        RunOptions {
            dry_run: true,
            reimport: false,
        }
    }

    #[tokio::test]
    async fn dry_run_is_idempotent_and_offline() {
        let raw = eml(&[("Focus Timer", "$10.99"), ("Other App", "$2.99")], "$1.12", "$15.10");
        let mut ctx = RunContext::new(config(CONFIG), FakeApi::default(), dry(), today());

        let sink = LogSink::new(None, true);
        let mut first = Vec::new();
        let mut second = Vec::new();
        let a = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;
        let b = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;
        sink.write(&a.log, &mut first).unwrap();
        sink.write(&b.log, &mut second).unwrap();

        assert_eq!(a.exit_code(), EXIT_OK);
        assert_eq!(first, second);
        assert_eq!(a.log.outcome, Outcome::DryRun);
        assert_eq!(*ctx.poster().api().calls.borrow(), 0);

        let taxes: Vec<&str> = a.log.lines.iter().map(|l| l.tax.as_str()).collect();
        assert_eq!(taxes, vec!["0.88", "0.24"]);
        let totals = a.log.totals.as_ref().unwrap();
        assert_eq!(totals.grand, "15.10");
        assert!(totals.reconciled);
        assert_eq!(a.log.counts.matched, 1);
        assert_eq!(a.log.counts.fallback, 1);
    }

    #[tokio::test]
    async fn unmapped_without_fallback_exits_2_and_never_posts() {
        let content = CONFIG.replace("[mappings.fallback]\n", "[mappings.fallback]\nenabled = false\n");
        let raw = eml(&[("Focus Timer", "$10.99"), ("Mystery App", "$2.99")], "$1.12", "$15.10");
        let options = RunOptions {
            dry_run: false,
            reimport: false,
        };
        let mut ctx = RunContext::new(config(&content), FakeApi::default(), options, today());
        let report = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;

        assert_eq!(report.exit_code(), EXIT_UNMAPPED);
        assert!(matches!(report.error, Some(RunError::Mapping(_))));
        assert_eq!(report.log.unmapped, vec!["Mystery App".to_string()]);
        assert_eq!(report.log.outcome, Outcome::Failed);
        assert!(ctx.poster().api().posted.borrow().is_empty());
        assert_eq!(*ctx.poster().api().calls.borrow(), 0);
    }

    #[tokio::test]
    async fn fallback_flag_wins_over_default_on_live_split() {
        let raw = eml(&[("Focus Timer", "$10.99"), ("Other App", "$2.99")], "$1.12", "$15.10");
        let options = RunOptions {
            dry_run: false,
            reimport: false,
        };
        let mut ctx = RunContext::new(config(CONFIG), FakeApi::default(), options, today());
        let report = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;

        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.log.outcome, Outcome::Created);
        assert_eq!(report.log.transaction_id.as_deref(), Some("tx-created"));
        let posted = ctx.poster().api().posted.borrow();
        let tx = &posted[0];
        assert_eq!(tx.flag_color, Some(FlagColor::Yellow));
        assert_eq!(tx.amount, -15_100);
        assert_eq!(tx.subtransactions.len(), 2);
        assert_eq!(tx.subtransactions.iter().map(|s| s.amount).sum::<i64>(), tx.amount);
        assert_eq!(tx.memo.as_deref(), Some("Receipt: MQ7XK2LP9"));
    }

    #[tokio::test]
    async fn single_line_uses_default_flag_and_line_payee() {
        let raw = eml(&[("Focus Timer", "$10.99")], "$0.88", "$11.87");
        let options = RunOptions {
            dry_run: false,
            reimport: false,
        };
        let mut ctx = RunContext::new(config(CONFIG), FakeApi::default(), options, today());
        let report = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;

        assert_eq!(report.exit_code(), EXIT_OK);
        let posted = ctx.poster().api().posted.borrow();
        assert_eq!(posted[0].flag_color, Some(FlagColor::Blue));
        assert_eq!(posted[0].payee_name.as_deref(), Some("Focus Timer"));
        assert_eq!(posted[0].category_id.as_deref(), Some("cat-focus"));
        assert!(posted[0].subtransactions.is_empty());
    }

    #[tokio::test]
    async fn existing_receipt_is_reported_as_duplicate() {
        let existing = ExistingTransaction {
            id: "old".into(),
            date: NaiveDate::from_ymd_opt(2026, 1, 24).unwrap(),
            amount: -11_870,
            memo: Some("Receipt: MQ7XK2LP9".into()),
            import_id: None,
            deleted: false,
        };
        let api = FakeApi {
            existing: vec![existing],
            ..FakeApi::default()
        };
        let raw = eml(&[("Focus Timer", "$10.99")], "$0.88", "$11.87");
        let options = RunOptions {
            dry_run: false,
            reimport: false,
        };
        let mut ctx = RunContext::new(config(CONFIG), api, options, today());
        let report = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;

        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.log.outcome, Outcome::Duplicate);
        assert_eq!(report.log.transaction_id.as_deref(), Some("old"));
        assert!(ctx.poster().api().posted.borrow().is_empty());
    }

    #[tokio::test]
    async fn parse_failures_surface_in_dry_run_too() {
        let raw = eml(&[("Focus Timer", "$10.99")], "$0.88", "$11.88");
        let mut ctx = RunContext::new(config(CONFIG), FakeApi::default(), dry(), today());
        let report = ctx.process_bytes("r.eml", &raw, DocumentKind::Email).await;
        assert_eq!(report.exit_code(), EXIT_FAILURE);
        assert!(matches!(report.error, Some(RunError::Parse(_))));
        assert!(report.log.error.is_some());
    }

    #[tokio::test]
    async fn process_file_reads_receipt_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.eml");
        std::fs::write(&path, eml(&[("Focus Timer", "$10.99")], "$0.88", "$11.87")).unwrap();

        let mut ctx = RunContext::new(config(CONFIG), FakeApi::default(), dry(), today());
        let report = ctx.process_file(&path).await;
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.log.outcome, Outcome::DryRun);
        assert_eq!(report.log.receipt_id.as_deref(), Some("MQ7XK2LP9"));

        let missing = ctx.process_file(&dir.path().join("gone.eml")).await;
        assert_eq!(missing.exit_code(), EXIT_FAILURE);
        assert!(matches!(missing.error, Some(RunError::Parse(ParseError::Io(_)))));
    }

    #[tokio::test]
    async fn unsupported_file_kind_fails_before_reading() {
        let mut ctx = RunContext::new(config(CONFIG), FakeApi::default(), dry(), today());
        let report = ctx.process_file(Path::new("receipt.docx")).await;
        assert_eq!(report.exit_code(), EXIT_FAILURE);
        assert_eq!(report.log.source, "receipt.docx");
    }
}
