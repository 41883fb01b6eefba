//! Accounting spreadsheet adapter.
//!
//! Exports from the accounting tool are CSV files whose column names drift between versions
//! ("Token Amount Out" vs "ETH Out", "To Wallet" vs "To"). Each logical field has an ordered alias
//! list; [`ColumnMap::detect`] binds every field to one header, and any required field left
//! unbound fails the whole file with [`LedgerError::MissingColumns`].
//!
//! Columns that no field claims are kept per row in [`Transaction::extra`].

use super::TransactionSource;
use crate::error::{LedgerError, LedgerResult};
use crate::identity;
use crate::models::{parse_amount, DateWindow, SourceKind, Transaction};
use crate::timestamp_parser::TimestampParser;
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    AmountOut,
    FiatOut,
    To,
    From,
    Account,
    Date,
    Note,
}

/// Detection order. A header claimed by an earlier field is not offered to later ones, which
/// keeps the short `to` alias from grabbing "Token Amount Out".
const FIELDS: [Field; 7] = [
    Field::AmountOut,
    Field::FiatOut,
    Field::To,
    Field::From,
    Field::Account,
    Field::Date,
    Field::Note,
];

impl Field {
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::AmountOut => &["token amount out", "amount out", "eth out"],
            Field::FiatOut => &["fiat value out", "fiat out", "usd out"],
            Field::To => &["to wallet", "to", "recipient"],
            Field::From => &["from wallet", "from", "sender"],
            Field::Account => &["account", "category"],
            Field::Date => &["date time", "date", "timestamp"],
            Field::Note => &["description", "memo", "note", "reason"],
        }
    }

    fn label(self) -> &'static str {
        match self {
            Field::AmountOut => "Token Amount Out / ETH Out",
            Field::FiatOut => "Fiat Value Out / FIAT Out",
            Field::To => "To Wallet / To",
            Field::From => "From Wallet / From",
            Field::Account => "Account",
            Field::Date => "Date",
            Field::Note => "Description",
        }
    }

    fn required(self) -> bool {
        !matches!(self, Field::Date | Field::Note)
    }
}

/// Header index bound to each logical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub amount_out: usize,
    pub fiat_out: usize,
    pub to: usize,
    pub from: usize,
    pub account: usize,
    pub date: Option<usize>,
    pub note: Option<usize>,
    headers: Vec<String>,
}

impl ColumnMap {
    /// Bind fields to headers, case-insensitively.
    ///
    /// For each field an exact header match on any alias wins; otherwise the first alias (in
    /// priority order) contained in some header is used.
    pub fn detect(headers: &[String]) -> LedgerResult<Self> {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut claimed: Vec<usize> = Vec::new();
        let mut bound: Vec<(Field, Option<usize>)> = Vec::with_capacity(FIELDS.len());

        for field in FIELDS {
            let found = find_column(&lowered, field.aliases(), &claimed);
            if let Some(index) = found {
                claimed.push(index);
            }
            bound.push((field, found));
        }

        let missing: Vec<String> = bound
            .iter()
            .filter(|(field, index)| field.required() && index.is_none())
            .map(|(field, _)| field.label().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::MissingColumns {
                missing,
                available: headers.to_vec(),
            });
        }

        let get = |wanted: Field| {
            bound
                .iter()
                .find(|(field, _)| *field == wanted)
                .and_then(|(_, index)| *index)
        };

        // Required fields were checked above.
        Ok(Self {
            amount_out: get(Field::AmountOut).unwrap_or_default(),
            fiat_out: get(Field::FiatOut).unwrap_or_default(),
            to: get(Field::To).unwrap_or_default(),
            from: get(Field::From).unwrap_or_default(),
            account: get(Field::Account).unwrap_or_default(),
            date: get(Field::Date),
            note: get(Field::Note),
            headers: headers.to_vec(),
        })
    }

    pub fn header(&self, index: usize) -> Option<&str> {
        self.headers.get(index).map(String::as_str)
    }

    fn is_claimed(&self, index: usize) -> bool {
        index == self.amount_out
            || index == self.fiat_out
            || index == self.to
            || index == self.from
            || index == self.account
            || self.date == Some(index)
            || self.note == Some(index)
    }
}

fn find_column(lowered: &[String], aliases: &[&str], claimed: &[usize]) -> Option<usize> {
    let free = |index: &usize| !claimed.contains(index);

    for alias in aliases {
        if let Some(index) = (0..lowered.len()).filter(free).find(|&i| lowered[i] == *alias) {
            return Some(index);
        }
    }
    for alias in aliases {
        if let Some(index) = (0..lowered.len()).filter(free).find(|&i| lowered[i].contains(alias)) {
            return Some(index);
        }
    }
    None
}

/// One parsed accounting export.
#[derive(Debug, Clone)]
pub struct SpreadsheetLedger {
    name: String,
    columns: ColumnMap,
    transactions: Vec<Transaction>,
}

impl SpreadsheetLedger {
    pub fn from_path(path: &Path) -> LedgerResult<Self> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_reader(name, file)
    }

    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> LedgerResult<Self> {
        let name = name.into();
        let mut csv_reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record);
        }

        if rows.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(LedgerError::EmptySpreadsheet);
        }

        let columns = ColumnMap::detect(&headers)?;
        debug!(
            sheet = %name,
            amount = columns.header(columns.amount_out).unwrap_or_default(),
            to = columns.header(columns.to).unwrap_or_default(),
            account = columns.header(columns.account).unwrap_or_default(),
            "Detected spreadsheet columns"
        );

        let transactions: Vec<Transaction> = rows
            .iter()
            .map(|row| row_to_transaction(&name, &columns, row))
            .collect();
        info!(sheet = %name, rows = transactions.len(), "Loaded spreadsheet");

        Ok(Self {
            name,
            columns,
            transactions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn records(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

fn row_to_transaction(sheet: &str, columns: &ColumnMap, row: &StringRecord) -> Transaction {
    let cell = |index: usize| row.get(index).map(str::trim).unwrap_or_default();

    let to = cell(columns.to);
    let mut transaction = Transaction::new(SourceKind::Spreadsheet, to, parse_amount(cell(columns.amount_out)));
    transaction.payee_address = identity::extract_address(to).unwrap_or_default();
    transaction.counterparty_raw = cell(columns.from).to_string();
    transaction.amount_fiat = Some(parse_amount(cell(columns.fiat_out)));
    transaction.category = cell(columns.account).to_string();
    transaction.timestamp = columns.date.and_then(|i| TimestampParser::parse_optional(cell(i)));
    transaction.note = columns.note.map(|i| cell(i).to_string()).unwrap_or_default();
    transaction.source_group = sheet.to_string();

    for (index, value) in row.iter().enumerate() {
        if columns.is_claimed(index) || value.trim().is_empty() {
            continue;
        }
        if let Some(header) = columns.header(index) {
            transaction.extra.insert(header.to_string(), value.trim().to_string());
        }
    }
    transaction
}

#[async_trait]
impl TransactionSource for SpreadsheetLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transactions(&self, window: Option<&DateWindow>) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| match (window, &t.timestamp) {
                (Some(w), Some(ts)) => w.contains_timestamp(ts),
                _ => true,
            })
            .cloned()
            .collect())
    }
}
