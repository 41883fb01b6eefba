//! Reconciliation Engine
//!
//! Coordinates one run end to end:
//!
//! 1. **Sources**: spreadsheets and/or the indexer, each producing normalized transactions
//! 2. **Prices**: optional historical ETH price enrichment for records without fiat
//! 3. **Aggregation**: consolidation, streaming accrual and sorting
//! 4. **Reports**: detail and totals CSV files when requested
//!
//! Each run executes inside an `info` span carrying a fresh run id. Display is left to the
//! caller so library users can consume the [`AggregationReport`] directly.

use crate::aggregator::{AggregateOptions, AggregationReport, Aggregator};
use crate::config::Config;
use crate::display::DisplayManager;
use crate::logging::new_run_id;
use crate::models::{DatePreset, DateWindow, SortSpec, Transaction};
use crate::pricing::{CoinGeckoFeed, HistoricalPriceClient, PriceEnricher, PriceLookup};
use crate::reports::ReportWriter;
use crate::sources::{HttpTransport, IndexerClient, SpreadsheetLedger, TransactionSource};
use crate::streams::StreamBook;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, info_span, Instrument};

/// Everything a `report` run needs beyond configuration.
#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub sheets: Vec<PathBuf>,
    pub use_indexer: bool,
    pub window: Option<DateWindow>,
    pub include_streams: bool,
    pub fetch_prices: bool,
    pub sort: SortSpec,
    pub json_output: bool,
    pub limit: Option<usize>,
    pub detail_csv: Option<PathBuf>,
    pub totals_csv: Option<PathBuf>,
}

pub struct LedgerReconciler<'a> {
    config: &'a Config,
    streams: StreamBook,
    display_manager: DisplayManager,
}

impl<'a> LedgerReconciler<'a> {
    /// Uses the stream book from `paths.streams_file` when set, otherwise the built-in one.
    pub fn new(config: &'a Config) -> Result<Self> {
        let streams = match &config.paths.streams_file {
            Some(path) => StreamBook::load_from_file(path)?,
            None => StreamBook::builtin(),
        };
        Ok(Self::with_streams(config, streams))
    }

    pub fn with_streams(config: &'a Config, streams: StreamBook) -> Self {
        Self {
            config,
            streams,
            display_manager: DisplayManager::new(config.output.json_pretty),
        }
    }

    pub fn streams(&self) -> &StreamBook {
        &self.streams
    }

    pub fn display_manager(&self) -> &DisplayManager {
        &self.display_manager
    }

    /// Build sources and price client from configuration, then reconcile.
    pub async fn run_report(&self, request: &ReportRequest) -> Result<AggregationReport> {
        let sources = self.build_sources(request)?;

        let price_client = if request.fetch_prices {
            let feed = CoinGeckoFeed::new(
                &self.config.pricing.base_url,
                Duration::from_secs(self.config.pricing.timeout_secs),
            )?;
            Some(HistoricalPriceClient::new(feed, self.config.pricing.policy()))
        } else {
            None
        };
        let prices = price_client.as_ref().map(|client| client as &dyn PriceLookup);

        self.reconcile(&sources, prices, request).await
    }

    fn build_sources(&self, request: &ReportRequest) -> Result<Vec<Box<dyn TransactionSource>>> {
        let mut sources: Vec<Box<dyn TransactionSource>> = Vec::new();

        for path in &request.sheets {
            let ledger = SpreadsheetLedger::from_path(path)
                .with_context(|| format!("Failed to load spreadsheet: {}", path.display()))?;
            sources.push(Box::new(ledger));
        }

        if request.use_indexer {
            let transport = HttpTransport::new(
                &self.config.indexer.endpoint,
                Duration::from_secs(self.config.indexer.timeout_secs),
            )?;
            info!(endpoint = transport.endpoint(), "Using indexer");
            sources.push(Box::new(IndexerClient::new(transport, self.config.indexer.page_size)));
        }

        Ok(sources)
    }

    /// Run the pipeline over already-constructed sources.
    pub async fn reconcile(
        &self,
        sources: &[Box<dyn TransactionSource>],
        prices: Option<&dyn PriceLookup>,
        request: &ReportRequest,
    ) -> Result<AggregationReport> {
        let run_id = new_run_id();
        let window = request.window.map(|w| w.to_string()).unwrap_or_default();
        let span = info_span!("reconcile", run_id = %run_id, window = %window);

        async move {
            let mut records: Vec<Transaction> = Vec::new();
            for source in sources {
                let batch = source
                    .transactions(request.window.as_ref())
                    .await
                    .with_context(|| format!("Failed to load transactions from {}", source.name()))?;
                info!(source = source.name(), records = batch.len(), "Loaded transactions");
                records.extend(batch);
            }

            if let Some(lookup) = prices {
                let stats = PriceEnricher::new(lookup)
                    .with_batch_size(self.config.pricing.batch_size)
                    .enrich(&mut records)
                    .await;
                info!(
                    dates = stats.dates_requested,
                    priced_dates = stats.dates_priced,
                    unpriced_records = stats.records_unpriced,
                    "Price enrichment finished"
                );
            }

            let report = Aggregator::new(&self.streams).aggregate(&records, &self.aggregate_options(request));
            info!(
                payees = report.payees.len(),
                withdrawals = report.totals.withdrawal_count,
                "Reconciliation finished"
            );

            self.write_reports(&report, request)?;
            Ok::<_, anyhow::Error>(report)
        }
        .instrument(span)
        .await
    }

    pub fn aggregate_options(&self, request: &ReportRequest) -> AggregateOptions {
        AggregateOptions {
            window: request.window,
            include_streams: request.include_streams,
            category_filter: self.config.aggregation.category_filter.clone(),
            sort: request.sort,
        }
    }

    fn write_reports(&self, report: &AggregationReport, request: &ReportRequest) -> Result<()> {
        let writer = ReportWriter::new(&self.config.output.date_format);
        if let Some(path) = &request.detail_csv {
            writer
                .write_detail_file(report, path)
                .with_context(|| format!("Failed to write detail report: {}", path.display()))?;
        }
        if let Some(path) = &request.totals_csv {
            writer
                .write_totals_file(&report.payees, path)
                .with_context(|| format!("Failed to write totals report: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Resolve command-line date options into a window.
///
/// Explicit dates win over a preset, which wins over the configured default preset. `--since`
/// alone runs up to `today`. No options at all means no window.
pub fn resolve_window(
    since: Option<&str>,
    until: Option<&str>,
    preset: Option<&str>,
    default_preset: Option<&str>,
    today: NaiveDate,
) -> Result<Option<DateWindow>> {
    match (since, until) {
        (Some(since), Some(until)) => return Ok(Some(DateWindow::parse(since, until)?)),
        (Some(since), None) => {
            let start = crate::models::parse_day(since)?;
            return Ok(Some(DateWindow::new(start, today)?));
        }
        (None, Some(_)) => anyhow::bail!("--until requires --since"),
        (None, None) => {}
    }

    match preset.or(default_preset) {
        Some(raw) => {
            let preset: DatePreset = raw.parse()?;
            Ok(Some(DateWindow::from_preset(preset, today)?))
        }
        None => Ok(None),
    }
}
