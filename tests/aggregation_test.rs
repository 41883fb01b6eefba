//! End-to-end aggregation scenarios.

mod common;

use builder_ledger::schedule::RateSchedule;
use builder_ledger::{
    AggregateOptions, Aggregator, DateWindow, SortDirection, SortField, SortSpec, SourceKind, StreamBook,
};
use common::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

fn dated(mut tx: builder_ledger::Transaction, date: &str) -> builder_ledger::Transaction {
    tx.timestamp = day(date).and_hms_opt(9, 30, 0).map(|dt| dt.and_utc());
    tx
}

fn window(start: &str, end: &str) -> Option<DateWindow> {
    Some(DateWindow::parse(start, end).unwrap())
}

#[test]
fn test_two_payees_from_three_withdrawals() {
    let records = vec![
        dated(sheet_row(ALICE, dec!(1.0), dec!(2000), "Internal Cohort Streams"), "2025-03-01"),
        dated(sheet_row(BOB, dec!(2.0), dec!(4000), "Internal Cohort Streams"), "2025-03-05"),
        dated(sheet_row(ALICE, dec!(1.5), dec!(3000), "Internal Cohort Streams"), "2025-03-09"),
    ];
    let book = StreamBook::empty();
    let options = AggregateOptions {
        window: window("2025-03-01", "2025-03-10"),
        ..Default::default()
    };

    let report = Aggregator::new(&book).aggregate(&records, &options);

    assert_eq!(report.payees.len(), 2);
    let a = &report.payees[0];
    let b = &report.payees[1];
    assert_eq!(a.address, ALICE);
    assert_eq!(a.total_primary, dec!(2.5));
    assert_eq!(a.withdrawal_count, 2);
    assert_eq!(b.address, BOB);
    assert_eq!(b.total_primary, dec!(2.0));
    assert_eq!(b.withdrawal_count, 1);

    // Newest first.
    assert_eq!(a.history[0].transaction.amount_primary, dec!(1.5));
    assert_eq!(a.history[0].to_display_name, "0xaaaa...aaaa");
    assert_eq!(a.history[0].from_display_name, "Treasury");
}

#[test]
fn test_window_excludes_out_of_range_but_keeps_undated() {
    let records = vec![
        dated(sheet_row(ALICE, dec!(1), dec!(1), "internal cohort"), "2025-02-28"),
        dated(sheet_row(ALICE, dec!(2), dec!(2), "internal cohort"), "2025-03-10"),
        sheet_row(ALICE, dec!(4), dec!(4), "internal cohort"),
    ];
    let book = StreamBook::empty();
    let options = AggregateOptions {
        window: window("2025-03-01", "2025-03-10"),
        ..Default::default()
    };

    let report = Aggregator::new(&book).aggregate(&records, &options);
    assert_eq!(report.filtered_out, 1);
    assert_eq!(report.payees[0].total_primary, dec!(6));
    // The undated record sorts last in history.
    assert!(report.payees[0].history[1].transaction.timestamp.is_none());
}

#[test]
fn test_streaming_only_payee() {
    let schedule = RateSchedule::new(CAROL, "carol.eth", dec!(3000), day("2024-12-01"));
    let book = StreamBook::new(1, BTreeMap::new(), vec![schedule]);
    let options = AggregateOptions {
        window: window("2025-01-01", "2025-01-31"),
        include_streams: true,
        ..Default::default()
    };

    let report = Aggregator::new(&book).aggregate(&[], &options);

    assert_eq!(report.payees.len(), 1);
    let carol = &report.payees[0];
    assert_eq!(carol.key, "carol.eth");
    assert_eq!(carol.total_primary, Decimal::ZERO);
    assert_eq!(carol.withdrawal_count, 0);
    assert_eq!(carol.streaming_amount, Some(dec!(3000) / dec!(30) * dec!(31)));
    assert_eq!(report.totals.total_streaming, dec!(3100));
}

#[test]
fn test_streaming_attaches_to_matching_payee() {
    let schedule = RateSchedule::new(ALICE, "alice.eth", dec!(3000), day("2025-01-01"));
    let book = StreamBook::new(1, BTreeMap::new(), vec![schedule]);
    let records = vec![dated(
        sheet_row(&hyperlink(ALICE, "alice.eth streams"), dec!(1), dec!(3000), "internal cohort"),
        "2025-01-05",
    )];
    let options = AggregateOptions {
        window: window("2025-01-01", "2025-01-10"),
        include_streams: true,
        ..Default::default()
    };

    let report = Aggregator::new(&book).aggregate(&records, &options);
    assert_eq!(report.payees.len(), 1);
    assert_eq!(report.payees[0].streaming_amount, Some(dec!(1000)));
    assert_eq!(report.payees[0].combined_fiat(), dec!(4000));
}

#[test]
fn test_rate_change_mid_window_through_aggregation() {
    let schedule = RateSchedule::new(BOB, "bob.eth", dec!(6000), day("2025-01-01"))
        .with_rate_change(day("2025-01-01"), dec!(2500))
        .with_rate_change(day("2025-01-11"), dec!(6000));
    let book = StreamBook::new(1, BTreeMap::new(), vec![schedule]);
    let options = AggregateOptions {
        window: window("2025-01-01", "2025-01-20"),
        include_streams: true,
        ..Default::default()
    };

    let report = Aggregator::new(&book).aggregate(&[], &options);
    let expected = dec!(2500) / dec!(30) * dec!(10) + dec!(6000) / dec!(30) * dec!(10);
    let actual = report.payees[0].streaming();
    assert!((actual - expected).abs() < dec!(0.0000001), "{actual} vs {expected}");
}

#[test]
fn test_aliased_wallets_consolidate_into_one_bucket() {
    let aliases = BTreeMap::from([
        (ALICE.to_string(), "zak.eth".to_string()),
        (BOB.to_string(), "zak.eth".to_string()),
    ]);
    let book = StreamBook::new(1, aliases, Vec::new());
    let records = vec![
        sheet_row(&hyperlink(ALICE, "frogbaseball.eth"), dec!(1), dec!(10), "internal cohort"),
        sheet_row(BOB, dec!(2), dec!(20), "internal cohort"),
        withdrawal(BOB, dec!(0.5), "2025-01-01", "PR review"),
    ];

    let report = Aggregator::new(&book).aggregate(&records, &AggregateOptions::default());

    assert_eq!(report.payees.len(), 1);
    let zak = &report.payees[0];
    assert_eq!(zak.key, "zak.eth");
    assert_eq!(zak.withdrawal_count, 3);
    assert_eq!(zak.addresses.len(), 2);
    assert_eq!(zak.unpriced_count, 1);
    assert_eq!(zak.total_fiat, dec!(30));
}

#[test]
fn test_one_wallet_never_splits_across_names() {
    let book = StreamBook::empty();
    let records = vec![
        sheet_row(ALICE, dec!(1), dec!(1), "internal cohort"),
        sheet_row(&hyperlink(ALICE, "alice.eth"), dec!(2), dec!(2), "internal cohort"),
        sheet_row(&hyperlink(ALICE, "alicia.eth"), dec!(3), dec!(3), "internal cohort"),
    ];

    let report = Aggregator::new(&book).aggregate(&records, &AggregateOptions::default());
    assert_eq!(report.payees.len(), 1);
    assert_eq!(report.payees[0].key, "alice.eth");
    assert_eq!(report.payees[0].total_primary, dec!(6));
}

#[test]
fn test_totals_match_sum_of_kept_records() {
    let records = vec![
        sheet_row(ALICE, dec!(0.1), dec!(1), "internal cohort"),
        sheet_row(BOB, dec!(0.2), dec!(1), "Internal Cohort"),
        sheet_row(CAROL, dec!(0.3), dec!(1), "other"),
        sheet_row("nobody", dec!(9), dec!(1), "internal cohort"),
        withdrawal(CAROL, dec!(0.4), "2025-01-01", "build"),
    ];
    let book = StreamBook::empty();
    let report = Aggregator::new(&book).aggregate(&records, &AggregateOptions::default());

    let payee_sum: Decimal = report.payees.iter().map(|p| p.total_primary).sum();
    assert_eq!(payee_sum, dec!(0.7));
    assert_eq!(report.totals.total_primary, dec!(0.7));
    assert_eq!(report.unresolved, 1);
    assert_eq!(report.filtered_out, 1);
    assert_eq!(report.records_seen, 5);
}

#[test]
fn test_sorting_is_stable_and_repeatable() {
    let records: Vec<_> = [ALICE, BOB, CAROL]
        .iter()
        .map(|addr| sheet_row(addr, dec!(1), dec!(1), "internal cohort"))
        .collect();
    let book = StreamBook::empty();
    let options = AggregateOptions {
        sort: SortSpec {
            field: SortField::Withdrawals,
            direction: SortDirection::Desc,
        },
        ..Default::default()
    };

    let first = Aggregator::new(&book).aggregate(&records, &options);
    let second = Aggregator::new(&book).aggregate(&records, &options);
    let order = |r: &builder_ledger::AggregationReport| r.payees.iter().map(|p| p.key.clone()).collect::<Vec<_>>();

    assert_eq!(order(&first), order(&second));
    // Ties keep first-seen order.
    assert_eq!(order(&first), vec![ALICE, BOB, CAROL]);
}

#[test]
fn test_sort_by_name_ascending() {
    let records = vec![
        sheet_row(&hyperlink(ALICE, "zed.eth"), dec!(1), dec!(1), "internal cohort"),
        sheet_row(&hyperlink(BOB, "Amy.eth"), dec!(1), dec!(1), "internal cohort"),
    ];
    let book = StreamBook::empty();
    let options = AggregateOptions {
        sort: SortSpec {
            field: SortField::Name,
            direction: SortDirection::Asc,
        },
        ..Default::default()
    };
    let report = Aggregator::new(&book).aggregate(&records, &options);
    assert_eq!(report.payees[0].display_name, "Amy.eth");
}

#[test]
fn test_indexer_records_ignore_category_filter() {
    let mut tx = withdrawal(ALICE, dec!(1), "2025-01-01", "build");
    tx.category = "OldSandGarden".to_string();
    assert_eq!(tx.source, SourceKind::Indexer);

    let book = StreamBook::empty();
    let report = Aggregator::new(&book).aggregate(&[tx], &AggregateOptions::default());
    assert_eq!(report.payees.len(), 1);
}

#[test]
fn test_oversized_sheet_amounts_do_not_abort_the_run() {
    let csv = format!(
        "Date,Account,From,To,ETH Out,FIAT Out\n\
         2025-03-02,Internal Cohort,Treasury,{ALICE},50000000000000000000000000000,10\n\
         2025-03-03,Internal Cohort,Treasury,{ALICE},50000000000000000000000000000,10\n\
         2025-03-04,Internal Cohort,Treasury,{BOB},1,2000\n"
    );
    let sheet = builder_ledger::sources::SpreadsheetLedger::from_reader("huge.csv", csv.as_bytes()).unwrap();
    let book = StreamBook::empty();

    let report = Aggregator::new(&book).aggregate(sheet.records(), &AggregateOptions::default());

    assert_eq!(report.payees.len(), 2);
    let alice = report.payees.iter().find(|p| p.address == ALICE).unwrap();
    assert_eq!(alice.total_primary, dec!(50000000000000000000000000000));
    assert_eq!(alice.total_fiat, dec!(10));
    assert_eq!(alice.withdrawal_count, 2);
    assert_eq!(alice.history.len(), 2);
    let bob = report.payees.iter().find(|p| p.address == BOB).unwrap();
    assert_eq!(bob.total_fiat, dec!(2000));
}
