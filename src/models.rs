//! Core Data Models
//!
//! This module defines the data structures that flow through the reconciliation pipeline,
//! from normalized source records to the per-payee summaries handed to reports.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`Transaction`] - one normalized withdrawal, whatever source it came from
//! 2. **Aggregation**: [`PayeeSummary`] - all activity consolidated under one payee key
//! 3. **History**: [`HistoryEntry`] - a transaction decorated with resolved display names
//! 4. **Totals**: [`LedgerTotals`] - sums across every payee in a run
//!
//! ## Date Handling
//!
//! - [`DateWindow`] - inclusive calendar-day range used for filtering and streaming accrual
//! - [`DatePreset`] - relative ranges (`3m`, `1y`, ...) and whole calendar years
//!
//! ## Money
//!
//! Amounts use [`rust_decimal::Decimal`]. Fiat is optional on a transaction: `None` means no
//! price was available and is rendered as a placeholder rather than as zero.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which adapter produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Indexer,
    Spreadsheet,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Indexer => write!(f, "indexer"),
            SourceKind::Spreadsheet => write!(f, "spreadsheet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub source: SourceKind,
    pub payee_address: String,
    pub raw_identity: String,
    pub counterparty_raw: String,
    pub amount_primary: Decimal,
    pub amount_fiat: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
    pub category: String,
    pub note: String,
    pub source_group: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Transaction {
    pub fn new(source: SourceKind, raw_identity: impl Into<String>, amount_primary: Decimal) -> Self {
        Self {
            source,
            payee_address: String::new(),
            raw_identity: raw_identity.into(),
            counterparty_raw: String::new(),
            amount_primary,
            amount_fiat: None,
            timestamp: None,
            category: String::new(),
            note: String::new(),
            source_group: String::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Seconds since epoch, with missing timestamps treated as the epoch itself.
    pub fn sort_timestamp(&self) -> i64 {
        self.timestamp.map(|ts| ts.timestamp()).unwrap_or(0)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|ts| ts.date_naive())
    }
}

static NUMERIC_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("valid amount regex"));

/// Parse a free-form amount cell. Anything unparseable or negative becomes zero.
///
/// Mirrors a lenient float parse: thousands separators and a leading currency sign are
/// ignored, and trailing text after the numeric prefix (`"1.5 ETH"`) is dropped.
pub fn parse_amount(raw: &str) -> Decimal {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    let Some(found) = NUMERIC_PREFIX.find(&cleaned) else {
        return Decimal::ZERO;
    };
    let mut number = found.as_str().trim_start_matches('+').trim_end_matches('.').to_string();
    if number.starts_with('.') {
        number.insert(0, '0');
    } else if number.starts_with("-.") {
        number.insert(1, '0');
    }

    let parsed = Decimal::from_str(&number).or_else(|_| Decimal::from_scientific(&number));
    match parsed {
        Ok(value) if value.is_sign_negative() => Decimal::ZERO,
        Ok(value) => value.normalize(),
        Err(_) => Decimal::ZERO,
    }
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> LedgerResult<Self> {
        if end < start {
            return Err(LedgerError::InvalidDateWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a window from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> LedgerResult<Self> {
        Self::new(parse_day(start)?, parse_day(end)?)
    }

    pub fn from_preset(preset: DatePreset, today: NaiveDate) -> LedgerResult<Self> {
        match preset {
            DatePreset::Months(months) => {
                let start = today
                    .checked_sub_months(Months::new(months))
                    .map(|d| d + Duration::days(1))
                    .ok_or_else(|| LedgerError::InvalidDate(format!("{today} minus {months} months")))?;
                Self::new(start, today)
            }
            DatePreset::Year(year) => {
                let start = NaiveDate::from_ymd_opt(year, 1, 1)
                    .ok_or_else(|| LedgerError::InvalidDate(year.to_string()))?;
                let end = NaiveDate::from_ymd_opt(year, 12, 31)
                    .ok_or_else(|| LedgerError::InvalidDate(year.to_string()))?;
                Self::new(start, end)
            }
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn contains_timestamp(&self, timestamp: &DateTime<Utc>) -> bool {
        self.contains(timestamp.date_naive())
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// First second of the start day, UTC.
    pub fn start_epoch(&self) -> i64 {
        self.start.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp()).unwrap_or(0)
    }

    /// Last second of the end day, UTC.
    pub fn end_epoch(&self) -> i64 {
        self.end.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc().timestamp()).unwrap_or(0)
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

pub fn parse_day(raw: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| LedgerError::InvalidDate(raw.to_string()))
}

/// Relative or calendar-year date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    Months(u32),
    Year(i32),
}

impl FromStr for DatePreset {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(DatePreset::Months(1)),
            "2m" => Ok(DatePreset::Months(2)),
            "3m" => Ok(DatePreset::Months(3)),
            "6m" => Ok(DatePreset::Months(6)),
            "9m" => Ok(DatePreset::Months(9)),
            "1y" => Ok(DatePreset::Months(12)),
            other if other.len() == 4 => other
                .parse::<i32>()
                .map(DatePreset::Year)
                .map_err(|_| LedgerError::InvalidDate(s.to_string())),
            _ => Err(LedgerError::InvalidDate(s.to_string())),
        }
    }
}

/// A transaction as it appears in a payee's withdrawal history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub from_display_name: String,
    pub to_display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeSummary {
    pub key: String,
    pub display_name: String,
    pub address: String,
    pub addresses: Vec<String>,
    pub total_primary: Decimal,
    pub total_fiat: Decimal,
    pub unpriced_count: u32,
    /// `None` when streaming payments were not part of the run.
    pub streaming_amount: Option<Decimal>,
    pub withdrawal_count: u32,
    pub history: Vec<HistoryEntry>,
}

impl PayeeSummary {
    pub fn new(key: String, display_name: String, address: String) -> Self {
        Self {
            key,
            display_name,
            addresses: vec![address.clone()],
            address,
            total_primary: Decimal::ZERO,
            total_fiat: Decimal::ZERO,
            unpriced_count: 0,
            streaming_amount: None,
            withdrawal_count: 0,
            history: Vec::new(),
        }
    }

    pub fn streaming(&self) -> Decimal {
        self.streaming_amount.unwrap_or(Decimal::ZERO)
    }

    /// Fiat plus streaming DAI, counting 1 DAI as 1 USD.
    pub fn combined_fiat(&self) -> Decimal {
        self.total_fiat.saturating_add(self.streaming())
    }

    pub fn reasons(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(|entry| entry.transaction.note.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub total_primary: Decimal,
    pub total_fiat: Decimal,
    pub total_streaming: Decimal,
    pub total_fiat_with_streaming: Decimal,
    pub payee_count: usize,
    pub withdrawal_count: u32,
    pub unpriced_count: u32,
}

impl LedgerTotals {
    /// Column sums over every payee. Money sums saturate at `Decimal::MAX` instead of overflowing.
    pub fn from_payees(payees: &[PayeeSummary]) -> Self {
        let mut totals = LedgerTotals {
            payee_count: payees.len(),
            ..Default::default()
        };
        for payee in payees {
            totals.total_primary = totals.total_primary.saturating_add(payee.total_primary);
            totals.total_fiat = totals.total_fiat.saturating_add(payee.total_fiat);
            totals.total_streaming = totals.total_streaming.saturating_add(payee.streaming());
            totals.withdrawal_count += payee.withdrawal_count;
            totals.unpriced_count += payee.unpriced_count;
        }
        totals.total_fiat_with_streaming = totals.total_fiat.saturating_add(totals.total_streaming);
        totals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Name,
    #[default]
    #[value(alias = "primary")]
    Eth,
    #[value(alias = "streaming")]
    Dai,
    Fiat,
    Withdrawals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_amount_lenient() {
        assert_eq!(parse_amount("1.5"), dec!(1.5));
        assert_eq!(parse_amount(" 1,234.50 "), dec!(1234.5));
        assert_eq!(parse_amount("$12"), dec!(12));
        assert_eq!(parse_amount("0.25 ETH"), dec!(0.25));
        assert_eq!(parse_amount(".5"), dec!(0.5));
        assert_eq!(parse_amount("1e2"), dec!(100));
    }

    #[test]
    fn test_parse_amount_coerces_garbage_to_zero() {
        assert_eq!(parse_amount(""), Decimal::ZERO);
        assert_eq!(parse_amount("n/a"), Decimal::ZERO);
        assert_eq!(parse_amount("-3"), Decimal::ZERO);
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(DateWindow::new(day("2025-02-01"), day("2025-01-01")).is_err());
        let single = DateWindow::new(day("2025-02-01"), day("2025-02-01")).unwrap();
        assert_eq!(single.days(), 1);
    }

    #[test]
    fn test_window_contains_is_inclusive() {
        let window = DateWindow::parse("2025-01-01", "2025-01-10").unwrap();
        assert!(window.contains(day("2025-01-01")));
        assert!(window.contains(day("2025-01-10")));
        assert!(!window.contains(day("2025-01-11")));
        assert_eq!(window.days(), 10);
        assert_eq!(window.end_epoch() - window.start_epoch(), 10 * 86_400 - 1);
    }

    #[test]
    fn test_presets() {
        let today = day("2025-05-15");
        let three = DateWindow::from_preset("3m".parse().unwrap(), today).unwrap();
        assert_eq!(three.start(), day("2025-02-16"));
        assert_eq!(three.end(), today);

        let year = DateWindow::from_preset("2025".parse().unwrap(), today).unwrap();
        assert_eq!(year.start(), day("2025-01-01"));
        assert_eq!(year.end(), day("2025-12-31"));

        assert!("7w".parse::<DatePreset>().is_err());
    }

    #[test]
    fn test_totals_include_streaming_in_fiat() {
        let mut a = PayeeSummary::new("a.eth".into(), "a.eth".into(), "0xa".into());
        a.total_primary = dec!(1.5);
        a.total_fiat = dec!(3000);
        a.withdrawal_count = 2;
        let mut b = PayeeSummary::new("b.eth".into(), "b.eth".into(), "0xb".into());
        b.streaming_amount = Some(dec!(500));

        let totals = LedgerTotals::from_payees(&[a, b]);
        assert_eq!(totals.total_primary, dec!(1.5));
        assert_eq!(totals.total_streaming, dec!(500));
        assert_eq!(totals.total_fiat_with_streaming, dec!(3500));
        assert_eq!(totals.payee_count, 2);
        assert_eq!(totals.withdrawal_count, 2);
    }

    #[test]
    fn test_totals_saturate_instead_of_overflowing() {
        let mut a = PayeeSummary::new("a.eth".into(), "a.eth".into(), "0xa".into());
        a.total_primary = Decimal::MAX;
        a.total_fiat = Decimal::MAX;
        let mut b = PayeeSummary::new("b.eth".into(), "b.eth".into(), "0xb".into());
        b.total_primary = dec!(1);
        b.streaming_amount = Some(dec!(1));

        assert_eq!(a.combined_fiat(), Decimal::MAX);
        let totals = LedgerTotals::from_payees(&[a, b]);
        assert_eq!(totals.total_primary, Decimal::MAX);
        assert_eq!(totals.total_fiat_with_streaming, Decimal::MAX);
    }
}
