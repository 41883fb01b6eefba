//! Output Formatting and Display Management
//!
//! Renders reconciliation results either as colored terminal output or as JSON.
//!
//! ## Report Types
//! - **Payee report**: one line per payee with ETH, streamed DAI and fiat totals
//! - **Streams listing**: every streaming schedule with its current rate and accrual
//!
//! ## Number Formatting
//! - ETH: two decimals, leading zero dropped below one (`.25`)
//! - DAI: whole units with thousands separators (`12,500`)
//! - FIAT: two decimals with thousands separators (`3,210.50`)
//!
//! Fiat that could not be priced is shown as `-` rather than as zero.

use crate::aggregator::AggregationReport;
use crate::models::PayeeSummary;
use crate::streams::StreamAccrual;
use colored::Colorize;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

pub struct DisplayManager {
    json_pretty: bool,
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DisplayManager {
    pub fn new(json_pretty: bool) -> Self {
        Self { json_pretty }
    }

    pub fn display_report(&self, report: &AggregationReport, limit: Option<usize>, json_output: bool) {
        let shown: Vec<&PayeeSummary> = report.payees.iter().take(limit.unwrap_or(usize::MAX)).collect();

        if json_output {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct JsonReport<'a> {
                window: Option<String>,
                totals: &'a crate::models::LedgerTotals,
                records_seen: usize,
                filtered_out: usize,
                unresolved: usize,
                payees: Vec<&'a PayeeSummary>,
            }
            self.print_json(&JsonReport {
                window: report.window.map(|w| w.to_string()),
                totals: &report.totals,
                records_seen: report.records_seen,
                filtered_out: report.filtered_out,
                unresolved: report.unresolved,
                payees: shown,
            });
            return;
        }

        let streams_included = report.payees.iter().any(|p| p.streaming_amount.is_some());
        let window = report
            .window
            .map(|w| w.to_string())
            .unwrap_or_else(|| "all time".to_string());

        println!("\n{}", "=".repeat(80).bright_cyan());
        println!(
            "{}",
            format!("Builder Withdrawal Report ({window})").bright_white().bold()
        );
        println!("{}", "=".repeat(80).bright_cyan());

        let totals = &report.totals;
        let fiat_total = if streams_included {
            totals.total_fiat_with_streaming
        } else {
            totals.total_fiat
        };
        println!(
            "\n{} {} payees • {} withdrawals • {} ETH • {} DAI • {} FIAT\n",
            "📊".bright_yellow(),
            totals.payee_count.to_string().bright_white().bold(),
            totals.withdrawal_count.to_string().bright_white().bold(),
            format_eth(totals.total_primary).bright_white().bold(),
            format_dai(totals.total_streaming).bright_magenta().bold(),
            format!("${}", format_fiat(fiat_total)).bright_green().bold()
        );

        if totals.unpriced_count > 0 {
            println!(
                "{} {} withdrawals have no fiat price and are excluded from FIAT totals\n",
                "⚠️".bright_yellow(),
                totals.unpriced_count.to_string().bright_yellow().bold()
            );
        }
        if report.unresolved > 0 || report.filtered_out > 0 {
            println!(
                "   {} records read, {} filtered out, {} without a wallet address\n",
                report.records_seen,
                report.filtered_out,
                report.unresolved
            );
        }

        if shown.is_empty() {
            println!("No withdrawals found for this window.");
            return;
        }

        for (rank, payee) in shown.iter().enumerate() {
            let fiat = if payee.withdrawal_count > 0 && payee.unpriced_count == payee.withdrawal_count {
                "-".to_string()
            } else if streams_included {
                format!("${}", format_fiat(payee.combined_fiat()))
            } else {
                format!("${}", format_fiat(payee.total_fiat))
            };

            println!(
                "{:>3}. {} {}",
                rank + 1,
                payee.display_name.bright_cyan().bold(),
                format!("({})", crate::identity::short_address(&payee.address)).dimmed()
            );
            print!(
                "     ETH {}  FIAT {}",
                format_eth(payee.total_primary).bright_white(),
                fiat.bright_green()
            );
            if let Some(streaming) = payee.streaming_amount {
                print!("  DAI {}", format_dai(streaming).bright_magenta());
            }
            println!(
                "  ({} withdrawals)",
                payee.withdrawal_count.to_string().bright_white()
            );
            if payee.unpriced_count > 0 && fiat != "-" {
                println!(
                    "     {} {} unpriced",
                    "⚠️".bright_yellow(),
                    payee.unpriced_count
                );
            }
        }

        if shown.len() < report.payees.len() {
            println!(
                "\n   ... {} more payees (use --limit to show more)",
                report.payees.len() - shown.len()
            );
        }
        println!();
    }

    pub fn display_streams(&self, rows: &[StreamAccrual], window: Option<&str>, json_output: bool) {
        if json_output {
            self.print_json(&serde_json::json!({ "window": window, "streams": rows }));
            return;
        }

        println!("\n{}", "=".repeat(80).bright_cyan());
        println!("{}", "Streaming Payment Schedules".bright_white().bold());
        println!("{}", "=".repeat(80).bright_cyan());

        let total = rows
            .iter()
            .filter_map(|r| r.accrued)
            .fold(Decimal::ZERO, Decimal::saturating_add);
        if let Some(window) = window {
            println!(
                "\n{} {} streams • {} DAI accrued over {}\n",
                "💧".bright_blue(),
                rows.len().to_string().bright_white().bold(),
                format_dai(total).bright_magenta().bold(),
                window.bright_white()
            );
        } else {
            println!("\n{} {} streams\n", "💧".bright_blue(), rows.len().to_string().bright_white().bold());
        }

        for row in rows {
            let ends = row
                .end_date
                .map(|d| format!(" until {d}"))
                .unwrap_or_default();
            print!(
                "   {} {}/month since {}{}",
                row.display_name.bright_cyan().bold(),
                format_dai(row.current_monthly_rate).bright_white(),
                row.start_date,
                ends
            );
            match row.accrued {
                Some(accrued) => println!("  → {}", format_dai(accrued).bright_magenta()),
                None => println!(),
            }
        }
        println!();
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let rendered = if self.json_pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match rendered {
            Ok(json_str) => println!("{}", json_str),
            Err(e) => eprintln!("Error serializing report to JSON: {}", e),
        }
    }
}

/// Two decimals, with the leading zero dropped for amounts below one.
pub fn format_eth(amount: Decimal) -> String {
    let formatted = format!("{:.2}", round_half_up(amount, 2));
    match formatted.strip_prefix("0.") {
        Some(rest) => format!(".{rest}"),
        None => formatted,
    }
}

/// Whole units with thousands separators.
pub fn format_dai(amount: Decimal) -> String {
    group_thousands(&round_half_up(amount, 0).trunc().to_string())
}

/// Two decimals with thousands separators.
pub fn format_fiat(amount: Decimal) -> String {
    let formatted = format!("{:.2}", round_half_up(amount, 2));
    match formatted.split_once('.') {
        Some((whole, cents)) => format!("{}.{}", group_thousands(whole), cents),
        None => group_thousands(&formatted),
    }
}

fn round_half_up(amount: Decimal, dp: u32) -> Decimal {
    amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}")
}
