pub mod allocate;
pub mod flag;
pub mod money;
pub mod receipt;

pub use allocate::{allocate, AllocationError};
pub use flag::FlagColor;
pub use money::Money;
pub use receipt::{LineItem, ReceiptDocument, ReceiptError, UnreconciledReceipt};
