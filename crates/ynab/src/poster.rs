use std::collections::HashSet;

use chrono::{Days, NaiveDate};

use crate::client::BudgetApi;
use crate::error::ApiError;
use crate::payload::{ExistingTransaction, SaveTransaction};
use crate::plan::TransactionPlan;

/// Reimport attempts after the first duplicate, each under a fresh receipt id.
pub const MAX_REIMPORT_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Created {
        transaction_id: String,
        receipt_id: String,
        import_id: String,
    },
    /// Nothing was posted because a matching transaction already exists.
    Duplicate {
        existing_id: String,
        import_id: String,
    },
}

/// Duplicate guard plus poster for one run.
///
/// The account's recent transactions are listed once and reused for every
/// receipt in the run; transactions created here are added to that list.
pub struct Poster<A: BudgetApi> {
    api: A,
    account_id: String,
    lookback_days: u32,
    reimport: bool,
    existing: Option<Vec<ExistingTransaction>>,
    suffix: Box<dyn FnMut() -> u8 + Send>,
}

fn random_suffix() -> u8 {
    (uuid::Uuid::new_v4().as_u128() % 100) as u8
}

impl<A: BudgetApi> Poster<A> {
    pub fn new(api: A, account_id: impl Into<String>, lookback_days: u32, reimport: bool) -> Self {
        Self {
            api,
            account_id: account_id.into(),
            lookback_days,
            reimport,
            existing: None,
            suffix: Box::new(random_suffix),
        }
    }

    /// Replaces the random two-digit reimport suffix source.
    pub fn with_suffix_source(mut self, source: impl FnMut() -> u8 + Send + 'static) -> Self {
        self.suffix = Box::new(source);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn load_existing(&mut self, today: NaiveDate) -> Result<(), ApiError> {
        if self.existing.is_some() {
            return Ok(());
        }
        let since = today
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(NaiveDate::MIN);
        let txs = self.api.list_transactions(&self.account_id, since).await?;
        tracing::debug!("Loaded {} existing transaction(s) since {}", txs.len(), since);
        self.existing = Some(txs);
        Ok(())
    }

    fn find_duplicate(&self, plan: &TransactionPlan, payload: &SaveTransaction) -> Option<&ExistingTransaction> {
        self.existing.as_deref()?.iter().filter(|t| !t.deleted).find(|t| {
            t.import_id.as_deref() == Some(payload.import_id.as_str())
                || (t.amount == payload.amount
                    && t.memo.as_deref().is_some_and(|m| memo_names_receipt(m, &plan.receipt_id)))
        })
    }

    /// `<original>#NN`, never one already tried in this call.
    fn fresh_receipt_id(&mut self, original: &str, attempted: &mut HashSet<String>) -> String {
        let start = u32::from((self.suffix)() % 100);
        let id = (0..100)
            .map(|step| format!("{original}#{:02}", (start + step) % 100))
            .find(|candidate| !attempted.contains(candidate))
            .unwrap_or_else(|| format!("{original}#{:02}", start));
        attempted.insert(id.clone());
        id
    }

    /// Checks for a duplicate and posts the plan. With reimport enabled, a duplicate
    /// (found up front or reported as a conflict) is retried under a new receipt id
    /// up to [`MAX_REIMPORT_RETRIES`] times.
    pub async fn post(&mut self, plan: &TransactionPlan, today: NaiveDate) -> Result<PostOutcome, ApiError> {
        self.load_existing(today).await?;

        let original = plan.receipt_id.clone();
        let mut attempted = HashSet::from([original.clone()]);
        let mut current = plan.clone();
        let mut retries = 0;

        loop {
            let payload = current.to_payload();
            if let Some(dup) = self.find_duplicate(&current, &payload) {
                tracing::warn!(
                    "Receipt {} already posted as transaction {}",
                    current.receipt_id,
                    dup.id
                );
                if !self.reimport {
                    return Ok(PostOutcome::Duplicate {
                        existing_id: dup.id.clone(),
                        import_id: payload.import_id,
                    });
                }
            } else {
                match self.api.create_transaction(&payload).await {
                    Ok(transaction_id) => {
                        tracing::info!(
                            "Created transaction {} for receipt {}",
                            transaction_id,
                            current.receipt_id
                        );
                        if let Some(existing) = self.existing.as_mut() {
                            existing.push(ExistingTransaction {
                                id: transaction_id.clone(),
                                date: payload.date,
                                amount: payload.amount,
                                memo: payload.memo.clone(),
                                import_id: Some(payload.import_id.clone()),
                                deleted: false,
                            });
                        }
                        return Ok(PostOutcome::Created {
                            transaction_id,
                            receipt_id: current.receipt_id,
                            import_id: payload.import_id,
                        });
                    }
                    Err(ApiError::Conflict(body)) if self.reimport => {
                        tracing::warn!("Conflict posting receipt {}: {}", current.receipt_id, body);
                    }
                    Err(e) => return Err(e),
                }
            }

            if retries == MAX_REIMPORT_RETRIES {
                return Err(ApiError::RetriesExhausted {
                    receipt_id: original,
                    attempts: retries,
                });
            }
            retries += 1;
            let next_id = self.fresh_receipt_id(&original, &mut attempted);
            tracing::info!("Reimporting receipt {} as {}", original, next_id);
            current = plan.with_receipt_id(next_id);
        }
    }
}

/// True when `memo` is `Receipt: <id>` or `Receipt: <id>#NN`.
fn memo_names_receipt(memo: &str, receipt_id: &str) -> bool {
    let Some(rest) = memo.trim().strip_prefix("Receipt: ") else {
        return false;
    };
    match rest.strip_prefix(receipt_id) {
        Some("") => true,
        Some(suffix) => suffix
            .strip_prefix('#')
            .is_some_and(|digits| digits.len() == 2 && digits.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BuildOptions;
    use appledger_core::{LineItem, Money, ReceiptDocument};
    use appledger_rules::MatchedLine;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// In-memory API: records posts and answers from a script of responses.
    #[derive(Default)]
    struct FakeApi {
        existing: Vec<ExistingTransaction>,
        responses: RefCell<VecDeque<Result<String, ApiError>>>,
        posted: RefCell<Vec<SaveTransaction>>,
        list_calls: RefCell<usize>,
    }

    impl FakeApi {
        fn respond(self, r: Result<String, ApiError>) -> Self {
            self.responses.borrow_mut().push_back(r);
            self
        }
    }

    impl BudgetApi for FakeApi {
        async fn list_transactions(
            &self,
            _account_id: &str,
            _since: NaiveDate,
        ) -> Result<Vec<ExistingTransaction>, ApiError> {
            *self.list_calls.borrow_mut() += 1;
            Ok(self.existing.clone())
        }

        async fn create_transaction(&self, tx: &SaveTransaction) -> Result<String, ApiError> {
            self.posted.borrow_mut().push(tx.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("tx-{}", self.posted.borrow().len())))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 26).unwrap()
    }

    fn plan() -> TransactionPlan {
        let receipt = ReceiptDocument {
            receipt_id: "MQ7XK2LP9".into(),
            date: NaiveDate::from_ymd_opt(2026, 1, 24).unwrap(),
            currency: "USD".into(),
            line_items: vec![LineItem::new("Focus Timer", Money::from_cents(299))],
            tax_total: Money::from_cents(24),
            grand_total: Money::from_cents(323),
        };
        let line = MatchedLine {
            item: receipt.line_items[0].clone(),
            rule_id: "focus".into(),
            payee_name: "Focus".into(),
            category_id: "cat".into(),
            used_fallback: false,
            flag_color: None,
            allocated_tax: Money::from_cents(24),
        };
        let opts = BuildOptions {
            account_id: "acct".into(),
            default_flag: None,
            single_line_memo: true,
            split_payee_name: "Apple".into(),
        };
        TransactionPlan::build(&receipt, vec![line], &opts).unwrap()
    }

    fn existing_for(plan: &TransactionPlan) -> ExistingTransaction {
        ExistingTransaction {
            id: "old-1".into(),
            date: plan.date,
            amount: plan.amount_milliunits(),
            memo: Some(format!("Receipt: {}", plan.receipt_id)),
            import_id: None,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn posts_when_no_duplicate() {
        let mut poster = Poster::new(FakeApi::default(), "acct", 7, false);
        let outcome = poster.post(&plan(), today()).await.unwrap();
        assert!(matches!(outcome, PostOutcome::Created { ref receipt_id, .. } if receipt_id == "MQ7XK2LP9"));
        assert_eq!(poster.api().posted.borrow().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_by_memo_and_amount_skips_post() {
        let p = plan();
        let api = FakeApi {
            existing: vec![existing_for(&p)],
            ..FakeApi::default()
        };
        let mut poster = Poster::new(api, "acct", 7, false);
        let outcome = poster.post(&p, today()).await.unwrap();
        assert!(matches!(outcome, PostOutcome::Duplicate { ref existing_id, .. } if existing_id == "old-1"));
        assert!(poster.api().posted.borrow().is_empty());
    }

    #[tokio::test]
    async fn longer_receipt_id_in_memo_is_not_a_duplicate() {
        let p = plan();
        let mut other = existing_for(&p);
        other.id = "someone-else".into();
        other.memo = Some("Receipt: MQ7XK2LP9X".into());
        let api = FakeApi {
            existing: vec![other],
            ..FakeApi::default()
        };
        let mut poster = Poster::new(api, "acct", 7, false);
        assert!(matches!(poster.post(&p, today()).await.unwrap(), PostOutcome::Created { .. }));
        assert_eq!(poster.api().posted.borrow().len(), 1);
    }

    #[test]
    fn memo_matching_accepts_only_exact_or_suffixed_ids() {
        assert!(memo_names_receipt("Receipt: MQ7XK2LP9", "MQ7XK2LP9"));
        assert!(memo_names_receipt("Receipt: MQ7XK2LP9#07", "MQ7XK2LP9"));
        assert!(!memo_names_receipt("Receipt: MQ7XK2LP9X", "MQ7XK2LP9"));
        assert!(!memo_names_receipt("Receipt: MQ7XK2LP9#7", "MQ7XK2LP9"));
        assert!(!memo_names_receipt("Paid MQ7XK2LP9", "MQ7XK2LP9"));
    }

    #[tokio::test]
    async fn duplicate_by_import_id_skips_post() {
        let p = plan();
        let mut existing = existing_for(&p);
        existing.memo = None;
        existing.amount = 0;
        existing.import_id = Some(p.import_id());
        let api = FakeApi {
            existing: vec![existing],
            ..FakeApi::default()
        };
        let mut poster = Poster::new(api, "acct", 7, false);
        assert!(matches!(poster.post(&p, today()).await.unwrap(), PostOutcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn deleted_transactions_are_not_duplicates() {
        let p = plan();
        let mut existing = existing_for(&p);
        existing.deleted = true;
        let api = FakeApi {
            existing: vec![existing],
            ..FakeApi::default()
        };
        let mut poster = Poster::new(api, "acct", 7, false);
        assert!(matches!(poster.post(&p, today()).await.unwrap(), PostOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn reimport_posts_under_suffixed_id() {
        let p = plan();
        let api = FakeApi {
            existing: vec![existing_for(&p)],
            ..FakeApi::default()
        };
        let mut poster = Poster::new(api, "acct", 7, true).with_suffix_source(|| 7);
        let outcome = poster.post(&p, today()).await.unwrap();
        match outcome {
            PostOutcome::Created { receipt_id, import_id, .. } => {
                assert_eq!(receipt_id, "MQ7XK2LP9#07");
                assert_ne!(import_id, p.import_id());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let posted = poster.api().posted.borrow();
        assert_eq!(posted[0].memo.as_deref(), Some("Receipt: MQ7XK2LP9#07"));
    }

    #[tokio::test]
    async fn conflict_retries_never_reuse_an_id() {
        let api = FakeApi::default()
            .respond(Err(ApiError::Conflict("dup".into())))
            .respond(Err(ApiError::Conflict("dup".into())))
            .respond(Ok("tx-new".into()));
        let mut poster = Poster::new(api, "acct", 7, true).with_suffix_source(|| 42);
        let outcome = poster.post(&plan(), today()).await.unwrap();
        assert!(matches!(outcome, PostOutcome::Created { ref transaction_id, .. } if transaction_id == "tx-new"));

        let memos: Vec<String> = poster
            .api()
            .posted
            .borrow()
            .iter()
            .map(|t| t.memo.clone().unwrap())
            .collect();
        assert_eq!(
            memos,
            vec!["Receipt: MQ7XK2LP9", "Receipt: MQ7XK2LP9#42", "Receipt: MQ7XK2LP9#43"]
        );
    }

    #[tokio::test]
    async fn conflict_without_reimport_is_an_error() {
        let api = FakeApi::default().respond(Err(ApiError::Conflict("dup".into())));
        let mut poster = Poster::new(api, "acct", 7, false);
        assert!(matches!(poster.post(&plan(), today()).await, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let api = FakeApi::default()
            .respond(Err(ApiError::Conflict("1".into())))
            .respond(Err(ApiError::Conflict("2".into())))
            .respond(Err(ApiError::Conflict("3".into())))
            .respond(Err(ApiError::Conflict("4".into())))
            .respond(Ok("never".into()));
        let mut poster = Poster::new(api, "acct", 7, true);
        let err = poster.post(&plan(), today()).await.unwrap_err();
        assert!(matches!(err, ApiError::RetriesExhausted { attempts: MAX_REIMPORT_RETRIES, .. }));
        assert_eq!(poster.api().posted.borrow().len(), MAX_REIMPORT_RETRIES + 1);
    }

    #[tokio::test]
    async fn existing_list_is_fetched_once_and_remembers_creations() {
        let mut poster = Poster::new(FakeApi::default(), "acct", 7, false);
        let p = plan();
        assert!(matches!(poster.post(&p, today()).await.unwrap(), PostOutcome::Created { .. }));
        assert!(matches!(poster.post(&p, today()).await.unwrap(), PostOutcome::Duplicate { .. }));
        assert_eq!(*poster.api().list_calls.borrow(), 1);
    }
}
