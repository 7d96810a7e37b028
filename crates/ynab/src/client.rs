use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;

use crate::error::ApiError;
use crate::payload::{
    CreatedTransactionData, DataEnvelope, ExistingTransaction, PostTransactionWrapper,
    SaveTransaction, TransactionsData,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The two budgeting API calls a run makes.
#[allow(async_fn_in_trait)]
pub trait BudgetApi {
    /// Transactions on `account_id` dated on or after `since`.
    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<ExistingTransaction>, ApiError>;

    /// Posts one transaction and returns its id.
    async fn create_transaction(&self, transaction: &SaveTransaction) -> Result<String, ApiError>;
}

/// REST client for the YNAB v1 API, scoped to one budget.
pub struct YnabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    budget_id: String,
}

impl YnabClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        budget_id: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("appledger/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            budget_id: budget_id.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/budgets/{}{}", self.base_url, self.budget_id, path)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        return Err(ApiError::Conflict(body));
    }
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

impl BudgetApi for YnabClient {
    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<ExistingTransaction>, ApiError> {
        let url = self.url(&format!("/accounts/{account_id}/transactions"));
        tracing::debug!(%url, %since, "listing transactions");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("since_date", since.to_string())])
            .send()
            .await?;
        let envelope: DataEnvelope<TransactionsData> = check(resp).await?.json().await?;
        Ok(envelope.data.transactions)
    }

    async fn create_transaction(&self, transaction: &SaveTransaction) -> Result<String, ApiError> {
        let url = self.url("/transactions");
        tracing::debug!(%url, import_id = %transaction.import_id, "posting transaction");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&PostTransactionWrapper { transaction })
            .send()
            .await?;
        let envelope: DataEnvelope<CreatedTransactionData> = check(resp).await?.json().await?;
        let data = envelope.data;
        if let Some(tx) = data.transaction {
            return Ok(tx.id);
        }
        if let Some(id) = data.transaction_ids.into_iter().next() {
            return Ok(id);
        }
        if !data.duplicate_import_ids.is_empty() {
            return Err(ApiError::Conflict(data.duplicate_import_ids.join(", ")));
        }
        Err(ApiError::MissingTransactionId)
    }
}
