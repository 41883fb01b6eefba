//! Builder Ledger Library
//!
//! Reconciles payments made to builders across three independent records of the same money:
//! an on-chain event indexer, accounting spreadsheet exports, and continuously vesting
//! streaming-payment schedules. The result is one consolidated summary per payee plus
//! exportable CSV reports.
//!
//! ## Core Features
//!
//! - **Identity consolidation**: addresses, ENS names and spreadsheet hyperlink formulas resolve
//!   to a single payee, with an alias table for people who use several wallets
//! - **Streaming accrual**: daily integration of piecewise-constant monthly rates
//! - **Historical pricing**: rate-limited ETH/USD lookups with caching and backoff
//! - **Flexible output**: colored terminal reports, JSON, and quoted CSV exports
//!
//! ## Architecture Overview
//!
//! - [`models`] - Transactions, payee summaries, date windows and sort options
//! - [`identity`] - Address extraction and display-name parsing
//! - [`schedule`] - Rate schedules and accrual
//! - [`streams`] - The versioned stream book and address alias table
//! - [`sources`] - Indexer and spreadsheet adapters behind [`sources::TransactionSource`]
//! - [`pricing`] - Historical price client and enrichment
//! - [`aggregator`] - Filtering, consolidation, streaming enrichment and sorting
//! - [`reports`] - Detail and totals CSV writers
//! - [`display`] - Terminal and JSON rendering
//! - [`reconciler`] - Orchestrates a full run
//! - [`config`] - Configuration with file and environment variable support
//! - [`logging`] - Structured logging with JSON and pretty-print formats
//!
//! ## Main Entry Point
//!
//! ```rust,no_run
//! use builder_ledger::{Config, LedgerReconciler, ReportRequest};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let reconciler = LedgerReconciler::new(&config)?;
//! let request = ReportRequest {
//!     use_indexer: true,
//!     include_streams: true,
//!     ..Default::default()
//! };
//!
//! let report = reconciler.run_report(&request).await?;
//! println!("{} payees", report.payees.len());
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod display;
pub mod error;
pub mod identity;
pub mod logging;
pub mod models;
pub mod pricing;
pub mod reconciler;
pub mod reports;
pub mod schedule;
pub mod sources;
pub mod streams;
pub mod timestamp_parser;

pub use aggregator::{AggregateOptions, AggregationReport, Aggregator};
pub use config::Config;
pub use error::{LedgerError, LedgerResult};
pub use models::*;
pub use reconciler::{LedgerReconciler, ReportRequest};
pub use streams::StreamBook;
