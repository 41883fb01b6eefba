//! CSV report writers.
//!
//! Two files come out of a run:
//!
//! - **detail**: one row per withdrawal plus one row per streaming payment
//! - **totals**: one row per payee, with every withdrawal reason spread over `withdrawN` columns
//!
//! Every field is quoted. Fiat that could not be priced is written as `-`, never as zero.

use crate::aggregator::AggregationReport;
use crate::error::LedgerResult;
use crate::identity;
use crate::models::{DateWindow, HistoryEntry, PayeeSummary};
use csv::{QuoteStyle, WriterBuilder};
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const DETAIL_HEADER: [&str; 9] = [
    "ENS",
    "userAddress",
    "streamAddress",
    "cohort",
    "date",
    "amountETH",
    "amountUSD",
    "amountDAI",
    "reason",
];

pub const DEFAULT_DATE_FORMAT: &str = "%Y/%m/%d";
pub const DEFAULT_DETAIL_FILE: &str = "withdraws-detail.csv";
pub const DEFAULT_TOTALS_FILE: &str = "withdraws-totals.csv";
const STREAM_MARKER: &str = "stream";
const STREAM_REASON: &str = "Streaming DAI payment";
const PLACEHOLDER: &str = "-";

pub struct ReportWriter {
    date_format: String,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl ReportWriter {
    pub fn new(date_format: &str) -> Self {
        Self {
            date_format: date_format.to_string(),
        }
    }

    pub fn write_detail<W: Write>(&self, report: &AggregationReport, out: W) -> LedgerResult<()> {
        let mut writer = WriterBuilder::new().quote_style(QuoteStyle::Always).from_writer(out);
        writer.write_record(DETAIL_HEADER)?;

        for payee in &report.payees {
            let ens = ens_column(payee);
            for entry in &payee.history {
                writer.write_record(self.withdrawal_row(&ens, payee, entry))?;
            }

            let streaming = payee.streaming();
            if streaming > Decimal::ZERO {
                let period = report
                    .window
                    .as_ref()
                    .map(|w| self.format_window(w))
                    .unwrap_or_else(|| PLACEHOLDER.to_string());
                let amount = format!("{streaming:.2}");
                writer.write_record([
                    ens.as_str(),
                    payee.address.as_str(),
                    STREAM_MARKER,
                    PLACEHOLDER,
                    period.as_str(),
                    "0",
                    amount.as_str(),
                    amount.as_str(),
                    STREAM_REASON,
                ])?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn withdrawal_row(&self, ens: &str, payee: &PayeeSummary, entry: &HistoryEntry) -> Vec<String> {
        let tx = &entry.transaction;
        let date = tx
            .timestamp
            .map(|ts| ts.format(&self.date_format).to_string())
            .unwrap_or_else(|| PLACEHOLDER.to_string());
        let usd = tx
            .amount_fiat
            .map(|fiat| format!("{fiat:.2}"))
            .unwrap_or_else(|| PLACEHOLDER.to_string());

        vec![
            ens.to_string(),
            payee.address.clone(),
            or_placeholder(&tx.source_group),
            or_placeholder(&tx.category),
            date,
            tx.amount_primary.normalize().to_string(),
            usd,
            "0".to_string(),
            tx.note.clone(),
        ]
    }

    pub fn write_totals<W: Write>(&self, payees: &[PayeeSummary], out: W) -> LedgerResult<()> {
        let columns = payees.iter().map(|p| p.history.len()).max().unwrap_or(0);

        let mut writer = WriterBuilder::new().quote_style(QuoteStyle::Always).from_writer(out);
        let mut header: Vec<String> = ["ENS", "userAddress", "totalETH", "totalDAI", "totalUSD"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        header.extend((1..=columns).map(|i| format!("withdraw{i}")));
        writer.write_record(&header)?;

        for payee in payees {
            let mut row = vec![
                ens_column(payee),
                payee.address.clone(),
                format!("{:.6}", payee.total_primary),
                format!("{:.2}", payee.streaming()),
                format!("{:.2}", payee.combined_fiat()),
            ];
            let mut reasons: Vec<String> = payee.reasons().map(str::to_string).collect();
            reasons.resize(columns, PLACEHOLDER.to_string());
            row.extend(reasons);
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_detail_file(&self, report: &AggregationReport, path: &Path) -> LedgerResult<()> {
        self.write_detail(report, create_file(path)?)?;
        info!(path = %path.display(), "Wrote detail report");
        Ok(())
    }

    pub fn write_totals_file(&self, payees: &[PayeeSummary], path: &Path) -> LedgerResult<()> {
        self.write_totals(payees, create_file(path)?)?;
        info!(path = %path.display(), payees = payees.len(), "Wrote totals report");
        Ok(())
    }

    fn format_window(&self, window: &DateWindow) -> String {
        format!(
            "{} - {}",
            window.start().format(&self.date_format),
            window.end().format(&self.date_format)
        )
    }
}

fn ens_column(payee: &PayeeSummary) -> String {
    if identity::is_presentable(&payee.display_name) && payee.display_name != identity::short_address(&payee.address)
    {
        payee.display_name.clone()
    } else {
        PLACEHOLDER.to_string()
    }
}

fn or_placeholder(value: &str) -> String {
    if value.trim().is_empty() {
        PLACEHOLDER.to_string()
    } else {
        value.to_string()
    }
}

fn create_file(path: &Path) -> LedgerResult<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}
