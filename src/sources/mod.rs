//! Source adapters.
//!
//! Each adapter turns its native representation into normalized [`Transaction`]s:
//!
//! - [`indexer`] - paginated GraphQL queries against the on-chain event indexer
//! - [`spreadsheet`] - accounting CSV exports with loosely named columns
//!
//! Streaming-payment schedules are not transactions; they live in [`crate::streams`].

pub mod indexer;
pub mod spreadsheet;

use crate::error::LedgerResult;
use crate::models::{DateWindow, Transaction};
use async_trait::async_trait;

pub use indexer::{GraphqlTransport, HttpTransport, IndexerClient, IndexerSnapshot};
pub use spreadsheet::{ColumnMap, SpreadsheetLedger};

#[async_trait]
pub trait TransactionSource: Send + Sync {
    fn name(&self) -> &str;

    /// All records this source holds for `window` (everything when `None`).
    async fn transactions(&self, window: Option<&DateWindow>) -> LedgerResult<Vec<Transaction>>;
}
