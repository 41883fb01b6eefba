//! Library error type.
//!
//! Row-level problems (unparseable amounts, unresolvable identities) never surface here; they
//! are coerced or dropped where they occur. Everything in [`LedgerError`] is a file-level,
//! network-level or configuration failure that the caller must decide how to report.

use chrono::NaiveDate;
use std::io;
use thiserror::Error;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "could not find columns for: {}. Available columns: {}",
        missing.join(", "),
        available.join(", ")
    )]
    MissingColumns {
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("spreadsheet appears to be empty")]
    EmptySpreadsheet,

    #[error("failed to read spreadsheet: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("indexer request failed: {0}")]
    IndexerTransport(String),

    #[error("indexer returned HTTP {status}: {body}")]
    IndexerStatus { status: u16, body: String },

    #[error("indexer query '{query}' failed: {}", messages.join("; "))]
    IndexerQuery {
        query: &'static str,
        messages: Vec<String>,
    },

    #[error("indexer response for '{query}' did not match the expected schema: {reason}")]
    IndexerSchema { query: &'static str, reason: String },

    #[error("price lookup for {date} failed: {reason}")]
    PriceLookup { date: NaiveDate, reason: String },

    #[error("price lookup for {date} still rate limited after {attempts} attempts")]
    RateLimitExhausted { date: NaiveDate, attempts: u32 },

    #[error("invalid date window: end {end} is before start {start}")]
    InvalidDateWindow { start: NaiveDate, end: NaiveDate },

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("configuration error: {0}")]
    Config(String),
}
