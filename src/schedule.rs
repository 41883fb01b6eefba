//! Streaming payment schedules and accrual.
//!
//! A [`RateSchedule`] describes a continuously vesting DAI stream: a start date, an optional end
//! date and a list of monthly-rate changes. Months are normalised to 30 days, so a day inside the
//! active range accrues `monthly_rate / 30`.
//!
//! Accrual is integrated one calendar day at a time. Rate changes land on arbitrary dates inside
//! a window, and walking the days keeps every boundary explicit.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Days in a normalised payment month.
pub const DAYS_PER_MONTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateChange {
    pub effective_date: NaiveDate,
    /// DAI per 30 days from `effective_date` on.
    pub new_monthly_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSchedule {
    pub address: String,
    pub display_name: String,
    /// Nominal current rate; only consulted when `rate_changes` is empty.
    pub monthly_rate: Decimal,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub rate_changes: Vec<RateChange>,
    /// Wallets that belong to the same person as this stream, lowercase.
    #[serde(default)]
    pub address_aliases: BTreeSet<String>,
}

impl RateSchedule {
    pub fn new(
        address: &str,
        display_name: &str,
        monthly_rate: Decimal,
        start_date: NaiveDate,
    ) -> Self {
        let address = address.to_ascii_lowercase();
        Self {
            address_aliases: BTreeSet::from([address.clone()]),
            address,
            display_name: display_name.to_string(),
            monthly_rate,
            start_date,
            end_date: None,
            rate_changes: Vec::new(),
        }
    }

    pub fn ending(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_rate_change(mut self, effective_date: NaiveDate, new_monthly_rate: Decimal) -> Self {
        self.rate_changes.push(RateChange {
            effective_date,
            new_monthly_rate,
        });
        self.normalize();
        self
    }

    pub fn with_alias(mut self, address: &str) -> Self {
        self.address_aliases.insert(address.to_ascii_lowercase());
        self
    }

    /// Sort rate changes chronologically and make sure the stream's own address is an alias.
    /// Schedules loaded from files go through this before use.
    pub fn normalize(&mut self) {
        self.address = self.address.to_ascii_lowercase();
        self.rate_changes.sort_by_key(|change| change.effective_date);
        self.address_aliases = self
            .address_aliases
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect();
        self.address_aliases.insert(self.address.clone());
    }

    pub fn is_active_on(&self, day: NaiveDate) -> bool {
        if day < self.start_date {
            return false;
        }
        match self.end_date {
            Some(end) => day <= end,
            None => true,
        }
    }

    /// Monthly rate in effect on `day`, zero outside the active range.
    ///
    /// The running rate starts at the first rate change, so a change dated after `start_date`
    /// still governs the days before it.
    pub fn effective_monthly_rate(&self, day: NaiveDate) -> Decimal {
        if !self.is_active_on(day) {
            return Decimal::ZERO;
        }

        let Some(first) = self.rate_changes.first() else {
            return self.monthly_rate;
        };

        let mut current = first.new_monthly_rate;
        for change in &self.rate_changes {
            if day >= change.effective_date {
                current = change.new_monthly_rate;
            }
        }
        current
    }

    pub fn daily_rate(&self, day: NaiveDate) -> Decimal {
        self.effective_monthly_rate(day) / Decimal::from(DAYS_PER_MONTH)
    }

    /// Total DAI accrued over `[window_start, window_end]`, both inclusive.
    ///
    /// An inverted range accrues nothing. Monthly rates are summed per day and divided by 30 once
    /// at the end, which is the same quantity as summing the daily rates without intermediate
    /// rounding.
    pub fn accrual(&self, window_start: NaiveDate, window_end: NaiveDate) -> Decimal {
        if window_start > window_end {
            return Decimal::ZERO;
        }

        // Days outside the active range contribute nothing, so clamp before walking.
        let first = window_start.max(self.start_date);
        let last = match self.end_date {
            Some(end) => window_end.min(end),
            None => window_end,
        };
        if first > last {
            return Decimal::ZERO;
        }

        let mut monthly_sum = Decimal::ZERO;
        let mut day = first;
        while day <= last {
            monthly_sum = monthly_sum.saturating_add(self.effective_monthly_rate(day));
            day += Duration::days(1);
        }
        monthly_sum / Decimal::from(DAYS_PER_MONTH)
    }

    pub fn matches_address(&self, address: &str) -> bool {
        let address = address.to_ascii_lowercase();
        self.address == address || self.address_aliases.contains(&address)
    }

    /// Whether this stream pays the payee known by `key` through any of `addresses`.
    pub fn belongs_to(&self, key: &str, addresses: &[String]) -> bool {
        self.display_name.eq_ignore_ascii_case(key) || addresses.iter().any(|address| self.matches_address(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn stepped() -> RateSchedule {
        RateSchedule::new("0xAA", "baluuu.eth", dec!(6000), day("2025-01-01"))
            .with_rate_change(day("2025-01-01"), dec!(2500))
            .with_rate_change(day("2025-01-11"), dec!(6000))
    }

    #[test]
    fn test_rate_change_mid_window() {
        let accrued = stepped().accrual(day("2025-01-01"), day("2025-01-20"));
        assert_eq!(accrued, (dec!(2500) * dec!(10) + dec!(6000) * dec!(10)) / dec!(30));
    }

    #[test]
    fn test_single_day_equals_daily_rate() {
        let schedule = stepped();
        for d in ["2025-01-01", "2025-01-10", "2025-01-11", "2025-03-01"] {
            let d = day(d);
            assert_eq!(schedule.accrual(d, d), schedule.daily_rate(d));
        }
        assert_eq!(schedule.daily_rate(day("2025-01-05")), dec!(2500) / dec!(30));
        assert_eq!(schedule.daily_rate(day("2025-01-15")), dec!(6000) / dec!(30));
    }

    #[test]
    fn test_zero_outside_active_range() {
        let schedule = stepped().ending(day("2025-02-01"));
        assert_eq!(schedule.accrual(day("2024-12-31"), day("2024-12-31")), Decimal::ZERO);
        assert_eq!(schedule.accrual(day("2025-02-02"), day("2025-02-02")), Decimal::ZERO);
        assert_eq!(
            schedule.accrual(day("2025-02-01"), day("2025-02-10")),
            dec!(6000) / dec!(30)
        );
    }

    #[test]
    fn test_inverted_window_is_empty() {
        assert_eq!(stepped().accrual(day("2025-01-20"), day("2025-01-01")), Decimal::ZERO);
    }

    #[test]
    fn test_additive_over_adjacent_windows() {
        let schedule = stepped();
        let a = day("2024-12-20");
        let b = day("2025-01-15");
        let c = day("2025-02-28");
        let split = schedule.accrual(a, b) + schedule.accrual(b + Duration::days(1), c);
        let whole = schedule.accrual(a, c);
        assert!((split - whole).abs() < dec!(0.000000001), "{split} vs {whole}");
    }

    #[test]
    fn test_first_change_governs_before_its_date() {
        // Stream starts before its first recorded change; the first change's rate applies.
        let schedule = RateSchedule::new("0xbb", "late.eth", dec!(9999), day("2025-01-01"))
            .with_rate_change(day("2025-01-05"), dec!(3000));
        assert_eq!(schedule.effective_monthly_rate(day("2025-01-02")), dec!(3000));
    }

    #[test]
    fn test_nominal_rate_without_changes() {
        let schedule = RateSchedule::new("0xcc", "flat.eth", dec!(3000), day("2025-01-01"));
        assert_eq!(schedule.accrual(day("2025-03-01"), day("2025-03-30")), dec!(3000));
    }

    #[test]
    fn test_rate_changes_sorted_on_insert() {
        let schedule = RateSchedule::new("0xdd", "x.eth", dec!(1), day("2025-01-01"))
            .with_rate_change(day("2025-03-01"), dec!(200))
            .with_rate_change(day("2025-01-01"), dec!(100));
        assert_eq!(schedule.rate_changes[0].new_monthly_rate, dec!(100));
        assert!(schedule.matches_address("0xDD"));
    }
}
