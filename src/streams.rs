//! Streaming-payment schedule table.
//!
//! The stream book is a static, versioned input: the built-in table below, or a TOML file with
//! the same shape pointed to by `paths.streams_file`. It also carries the address alias table
//! used to consolidate several wallets owned by one builder under a single display name.
//!
//! ```toml
//! version = 2
//!
//! [aliases]
//! "0x53e90aa7eddedb58a2da1698028501c56c53978f" = "zakgriffith.eth"
//!
//! [[schedules]]
//! address = "0x53e90aa7eddedb58a2da1698028501c56c53978f"
//! displayName = "zakgriffith.eth"
//! monthlyRate = "6000"
//! startDate = "2025-01-01"
//! rateChanges = [{ effectiveDate = "2025-01-01", newMonthlyRate = "6000" }]
//! ```

use crate::models::DateWindow;
use crate::schedule::RateSchedule;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

pub const BUILTIN_VERSION: u32 = 2;

/// One schedule's standing, and its accrual when a window is given.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamAccrual {
    pub display_name: String,
    pub address: String,
    pub current_monthly_rate: Decimal,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrued: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamBook {
    pub version: u32,
    /// Wallet address (lowercase) to canonical display name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub schedules: Vec<RateSchedule>,
}

impl Default for StreamBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StreamBook {
    pub fn new(version: u32, aliases: BTreeMap<String, String>, schedules: Vec<RateSchedule>) -> Self {
        let mut book = Self {
            version,
            aliases,
            schedules,
        };
        book.normalize();
        book
    }

    pub fn empty() -> Self {
        Self::new(0, BTreeMap::new(), Vec::new())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read stream schedule file: {}", path.display()))?;
        let book: StreamBook = toml::from_str(&content)
            .with_context(|| format!("Failed to parse stream schedule file: {}", path.display()))?;
        info!(
            path = %path.display(),
            version = book.version,
            schedules = book.schedules.len(),
            "Loaded stream schedules from file"
        );
        Ok(Self::new(book.version, book.aliases, book.schedules))
    }

    /// Lowercase alias keys, then attach every aliased wallet to the schedule that shares its
    /// display name.
    fn normalize(&mut self) {
        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|(address, name)| (address.to_ascii_lowercase(), name))
            .collect();

        for schedule in &mut self.schedules {
            schedule.normalize();
            for (address, name) in &self.aliases {
                if name.eq_ignore_ascii_case(&schedule.display_name) {
                    schedule.address_aliases.insert(address.clone());
                }
            }
        }
    }

    /// Canonical display name for a wallet, if one is registered.
    pub fn alias_for(&self, address: &str) -> Option<&str> {
        self.aliases
            .get(&address.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Per-schedule accruals over `window`, or just the schedules when there is no window.
    ///
    /// The current rate is the one in effect on `as_of`. With a window, a stream that ended
    /// before `as_of` reports its last active rate instead of zero.
    pub fn accruals(&self, window: Option<&DateWindow>, as_of: NaiveDate) -> Vec<StreamAccrual> {
        self.schedules
            .iter()
            .map(|schedule| {
                let rate_day = match (window, schedule.end_date) {
                    (Some(_), Some(end)) => as_of.min(end),
                    _ => as_of,
                };
                StreamAccrual {
                    display_name: schedule.display_name.clone(),
                    address: schedule.address.clone(),
                    current_monthly_rate: schedule.effective_monthly_rate(rate_day),
                    start_date: schedule.start_date,
                    end_date: schedule.end_date,
                    accrued: window.map(|w| schedule.accrual(w.start(), w.end())),
                }
            })
            .collect()
    }

    pub fn builtin() -> Self {
        let aliases = BTreeMap::from([
            // inc.carletex.eth
            ("0x1990a6bcdb13d33463cba884a1ae6020292523e8".to_string(), "carletex.eth".to_string()),
            // frogbaseball.eth and zakgriffith.eth are the same person
            ("0x53e90aa7eddedb58a2da1698028501c56c53978f".to_string(), "zakgriffith.eth".to_string()),
            ("0xfe952cb6f4b8f4acd5337153da5c7c93dc3e44e1".to_string(), "zakgriffith.eth".to_string()),
            // andrealb.eth and andrealbiac.eth
            ("0x4cbe80191e63567191668d860acabaf15dac5512".to_string(), "andrealbiac.eth".to_string()),
            ("0xd04981840264a63df979064cbd6e4f7041df3f0e".to_string(), "andrealbiac.eth".to_string()),
        ]);

        let schedules = vec![
            stream("0x45334f41aaa464528cd5bc0f582acadc49eb0cd1", "0xrinat.eth", 5000, (2025, 4, 30))
                .with_rate_change(ymd(2025, 4, 30), Decimal::from(4000))
                .with_rate_change(ymd(2025, 8, 29), Decimal::from(5000)),
            stream("0x699bfac97c962db31238b429ceaf6734c492d61c", "baluuu.eth", 6000, (2025, 2, 15))
                .with_rate_change(ymd(2025, 2, 15), Decimal::from(2500))
                .with_rate_change(ymd(2025, 4, 29), Decimal::from(6000)),
            stream("0x1a2d838c4bbd1e73d162d0777d142c1d783cb831", "shivbhonde.eth", 5000, (2025, 4, 30))
                .with_rate_change(ymd(2025, 4, 30), Decimal::from(5000)),
            stream("0xb4f53bd85c00ef22946d24ae26bc38ac64f5e7b1", "pabl0cks.eth", 6000, (2025, 1, 1))
                .with_rate_change(ymd(2025, 1, 1), Decimal::from(2500))
                .with_rate_change(ymd(2025, 4, 29), Decimal::from(6000)),
            stream("0x1990a6bcdb13d33463cba884a1ae6020292523e8", "carletex.eth", 10000, (2025, 1, 1))
                .with_rate_change(ymd(2025, 1, 1), Decimal::from(7500))
                .with_rate_change(ymd(2025, 4, 29), Decimal::from(10000)),
            stream("0x38c772b96d73733f425746bd368b4b4435a37967", "spencerfaber.eth", 2500, (2025, 1, 1))
                .with_rate_change(ymd(2025, 1, 1), Decimal::from(2500)),
            stream("0x53e90aa7eddedb58a2da1698028501c56c53978f", "zakgriffith.eth", 6000, (2025, 1, 1))
                .with_rate_change(ymd(2025, 1, 1), Decimal::from(6000)),
            stream("0x4cbe80191e63567191668d860acabaf15dac5512", "andrealbiac.eth", 1000, (2025, 4, 30))
                .with_rate_change(ymd(2025, 4, 30), Decimal::from(1000)),
            stream("0x5f97cf9dd2cb7b53c47f6b1c26ab4bd143325d45", "gnole.eth", 6000, (2025, 1, 1))
                .ending(ymd(2025, 6, 16))
                .with_rate_change(ymd(2025, 1, 1), Decimal::from(6000)),
        ];

        Self::new(BUILTIN_VERSION, aliases, schedules)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn stream(address: &str, display_name: &str, monthly: u32, start: (i32, u32, u32)) -> RateSchedule {
    RateSchedule::new(address, display_name, Decimal::from(monthly), ymd(start.0, start.1, start.2))
}
