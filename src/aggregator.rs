//! Aggregation Engine
//!
//! Folds normalized [`Transaction`]s from every source into one [`PayeeSummary`] per payee.
//!
//! ## Pipeline
//!
//! 1. **Filter**: spreadsheet records must carry the configured category (case-insensitive
//!    substring); records with a timestamp must fall inside the window. Records without a
//!    timestamp are always kept.
//! 2. **Resolve**: each record's payee is resolved to a wallet address; records without one are
//!    counted as unresolved and dropped.
//! 3. **Bind**: a pre-pass binds every wallet to a single consolidation key, so one wallet never
//!    lands in two buckets. The alias table wins, then the first presentable name parsed for the
//!    wallet, then the wallet address itself.
//! 4. **Accumulate**: totals, withdrawal counts and history per bucket. Unavailable fiat is
//!    counted in `unpriced_count` instead of being summed as zero.
//! 5. **Streams**: with streams enabled and a window set, each payee receives the accrual of
//!    every schedule that belongs to it. Schedules that accrued something but matched no payee
//!    become streaming-only payees.
//! 6. **Sort**: stable, by the selected field and direction.
//!
//! The engine keeps no state between calls.

use crate::identity::{self, ResolvedIdentity};
use crate::models::{
    DateWindow, HistoryEntry, LedgerTotals, PayeeSummary, SortDirection, SortField, SortSpec, SourceKind,
    Transaction,
};
use crate::streams::StreamBook;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Spreadsheet category that marks builder payouts.
pub const DEFAULT_CATEGORY_FILTER: &str = "internal cohort";

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub window: Option<DateWindow>,
    pub include_streams: bool,
    /// Substring required in a spreadsheet record's category. Empty disables the filter.
    pub category_filter: String,
    pub sort: SortSpec,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            window: None,
            include_streams: false,
            category_filter: DEFAULT_CATEGORY_FILTER.to_string(),
            sort: SortSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub window: Option<DateWindow>,
    pub payees: Vec<PayeeSummary>,
    pub totals: LedgerTotals,
    pub records_seen: usize,
    pub filtered_out: usize,
    pub unresolved: usize,
}

/// Key and display name a wallet is consolidated under.
#[derive(Debug, Clone)]
struct Binding {
    key: String,
    display_name: String,
}

pub struct Aggregator<'a> {
    streams: &'a StreamBook,
}

impl<'a> Aggregator<'a> {
    pub fn new(streams: &'a StreamBook) -> Self {
        Self { streams }
    }

    pub fn aggregate(&self, records: &[Transaction], options: &AggregateOptions) -> AggregationReport {
        let category_filter = options.category_filter.trim().to_lowercase();

        let kept: Vec<&Transaction> = records
            .iter()
            .filter(|record| passes_filters(record, options.window.as_ref(), &category_filter))
            .collect();
        let filtered_out = records.len() - kept.len();

        let resolved: Vec<(&Transaction, ResolvedIdentity)> = kept
            .into_iter()
            .map(|record| (record, resolve_payee(record)))
            .collect();
        let unresolved = resolved.iter().filter(|(_, id)| !id.has_address()).count();
        let resolved: Vec<_> = resolved.into_iter().filter(|(_, id)| id.has_address()).collect();

        let bindings = self.bind_wallets(&resolved);

        let mut payees: Vec<PayeeSummary> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (record, id) in &resolved {
            let Some(binding) = bindings.get(&id.address) else {
                continue;
            };
            let slot = *index.entry(binding.key.clone()).or_insert_with(|| {
                payees.push(PayeeSummary::new(
                    binding.key.clone(),
                    binding.display_name.clone(),
                    id.address.clone(),
                ));
                payees.len() - 1
            });

            let payee = &mut payees[slot];
            if !payee.addresses.contains(&id.address) {
                payee.addresses.push(id.address.clone());
            }
            accumulate(payee, record);
            payee.withdrawal_count += 1;
            payee.history.push(HistoryEntry {
                transaction: (*record).clone(),
                from_display_name: party_label(&record.counterparty_raw),
                to_display_name: id.display_or_short(),
            });
        }

        for payee in &mut payees {
            // Stable, so records sharing a timestamp keep source order.
            payee
                .history
                .sort_by_key(|entry| std::cmp::Reverse(entry.transaction.sort_timestamp()));
        }

        if options.include_streams {
            match &options.window {
                Some(window) => self.apply_streams(&mut payees, window),
                None => debug!("Streaming accrual skipped: no date window"),
            }
        }

        sort_payees(&mut payees, options.sort, options.include_streams);
        let totals = LedgerTotals::from_payees(&payees);

        debug!(
            records = records.len(),
            filtered_out,
            unresolved,
            payees = payees.len(),
            "Aggregation complete"
        );

        AggregationReport {
            window: options.window,
            payees,
            totals,
            records_seen: records.len(),
            filtered_out,
            unresolved,
        }
    }

    fn bind_wallets(&self, resolved: &[(&Transaction, ResolvedIdentity)]) -> HashMap<String, Binding> {
        // First presentable name seen for each wallet, in record order.
        let mut first_names: HashMap<&str, &str> = HashMap::new();
        for (_, id) in resolved {
            if identity::is_presentable(&id.display_name) {
                first_names.entry(id.address.as_str()).or_insert(id.display_name.as_str());
            }
        }

        let mut bindings = HashMap::new();
        for (_, id) in resolved {
            if bindings.contains_key(&id.address) {
                continue;
            }
            let binding = if let Some(alias) = self.streams.alias_for(&id.address) {
                Binding {
                    key: alias.to_string(),
                    display_name: alias.to_string(),
                }
            } else if let Some(name) = first_names.get(id.address.as_str()) {
                Binding {
                    key: name.to_string(),
                    display_name: name.to_string(),
                }
            } else {
                Binding {
                    key: id.address.clone(),
                    display_name: identity::short_address(&id.address),
                }
            };
            bindings.insert(id.address.clone(), binding);
        }
        bindings
    }

    fn apply_streams(&self, payees: &mut Vec<PayeeSummary>, window: &DateWindow) {
        let schedules = &self.streams.schedules;
        let mut matched = vec![false; schedules.len()];

        for payee in payees.iter_mut() {
            let mut streaming = Decimal::ZERO;
            for (i, schedule) in schedules.iter().enumerate() {
                if schedule.belongs_to(&payee.key, &payee.addresses) {
                    streaming = streaming.saturating_add(schedule.accrual(window.start(), window.end()));
                    matched[i] = true;
                }
            }
            payee.streaming_amount = Some(streaming);
        }

        for (i, schedule) in schedules.iter().enumerate() {
            if matched[i] {
                continue;
            }
            let accrued = schedule.accrual(window.start(), window.end());
            if accrued <= Decimal::ZERO {
                continue;
            }

            let existing = payees
                .iter_mut()
                .find(|p| p.key.eq_ignore_ascii_case(&schedule.display_name));
            match existing {
                Some(payee) => {
                    payee.streaming_amount = Some(payee.streaming().saturating_add(accrued));
                    if !payee.addresses.contains(&schedule.address) {
                        payee.addresses.push(schedule.address.clone());
                    }
                }
                None => {
                    let mut payee = PayeeSummary::new(
                        schedule.display_name.clone(),
                        schedule.display_name.clone(),
                        schedule.address.clone(),
                    );
                    payee.streaming_amount = Some(accrued);
                    debug!(payee = %payee.key, %accrued, "Adding streaming-only payee");
                    payees.push(payee);
                }
            }
        }
    }
}

fn passes_filters(record: &Transaction, window: Option<&DateWindow>, category_filter: &str) -> bool {
    if record.source == SourceKind::Spreadsheet
        && !category_filter.is_empty()
        && !record.category.to_lowercase().contains(category_filter)
    {
        return false;
    }
    match (window, &record.timestamp) {
        (Some(window), Some(timestamp)) => window.contains_timestamp(timestamp),
        _ => true,
    }
}

fn resolve_payee(record: &Transaction) -> ResolvedIdentity {
    let mut id = identity::resolve(&record.raw_identity);
    if !record.payee_address.is_empty() {
        id.address = record.payee_address.to_ascii_lowercase();
    }
    id
}

/// Add one record's amounts to its payee. A record that would overflow the running totals is
/// counted as zero.
fn accumulate(payee: &mut PayeeSummary, record: &Transaction) {
    let primary = payee.total_primary.checked_add(record.amount_primary);
    let fiat = match record.amount_fiat {
        Some(fiat) => payee.total_fiat.checked_add(fiat).map(Some),
        None => Some(None),
    };

    match (primary, fiat) {
        (Some(primary), Some(fiat)) => {
            payee.total_primary = primary;
            match fiat {
                Some(fiat) => payee.total_fiat = fiat,
                None => payee.unpriced_count += 1,
            }
        }
        _ => warn!(
            payee = %payee.key,
            amount = %record.amount_primary,
            source = %record.source_group,
            "Amount overflows payee totals, counting record as zero"
        ),
    }
}

/// Human label for the other side of a transfer.
fn party_label(raw: &str) -> String {
    let id = identity::resolve(raw);
    if id.has_address() {
        return id.display_or_short();
    }
    if identity::is_presentable(&id.display_name) {
        return id.display_name;
    }
    raw.trim().to_string()
}

fn sort_payees(payees: &mut [PayeeSummary], sort: SortSpec, include_streams: bool) {
    payees.sort_by(|a, b| {
        let ordering = match sort.field {
            SortField::Name => a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()),
            SortField::Eth => a.total_primary.cmp(&b.total_primary),
            SortField::Dai => a.streaming().cmp(&b.streaming()),
            SortField::Fiat if include_streams => a.combined_fiat().cmp(&b.combined_fiat()),
            SortField::Fiat => a.total_fiat.cmp(&b.total_fiat),
            SortField::Withdrawals => a.withdrawal_count.cmp(&b.withdrawal_count),
        };
        let ordering = match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering == Ordering::Equal && sort.field == SortField::Eth {
            return b.streaming().cmp(&a.streaming());
        }
        ordering
    });
}
