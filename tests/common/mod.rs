#![allow(dead_code)]

use builder_ledger::{SourceKind, Transaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};

pub const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const CAROL: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Indexer-style withdrawal at noon UTC on `date`.
pub fn withdrawal(address: &str, amount: Decimal, date: &str, reason: &str) -> Transaction {
    let mut tx = Transaction::new(SourceKind::Indexer, address, amount);
    tx.payee_address = address.to_string();
    tx.timestamp = day(date).and_hms_opt(12, 0, 0).map(|dt| dt.and_utc());
    tx.note = reason.to_string();
    tx.category = "Sand Garden".to_string();
    tx
}

/// Spreadsheet row paid from the treasury.
pub fn sheet_row(to: &str, amount: Decimal, fiat: Decimal, category: &str) -> Transaction {
    let mut tx = Transaction::new(SourceKind::Spreadsheet, to, amount);
    tx.amount_fiat = Some(fiat);
    tx.counterparty_raw = "Treasury".to_string();
    tx.category = category.to_string();
    tx
}

pub fn hyperlink(address: &str, label: &str) -> String {
    format!(r#"=HYPERLINK("https://optimistic.etherscan.io/address/{address}","{label}")"#)
}

pub fn write_file(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).unwrap();
    path
}
