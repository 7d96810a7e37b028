pub mod client;
pub mod error;
pub mod payload;
pub mod plan;
pub mod poster;

pub use client::{BudgetApi, YnabClient};
pub use error::{ApiError, BuildError};
pub use payload::{ClearedStatus, ExistingTransaction, SaveSubTransaction, SaveTransaction};
pub use plan::{import_id, BuildOptions, PlanBody, TransactionPlan};
pub use poster::{PostOutcome, Poster, MAX_REIMPORT_RETRIES};
