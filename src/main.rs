use anyhow::Result;
use builder_ledger::config::Config;
use builder_ledger::logging::init_logging;
use builder_ledger::reconciler::{resolve_window, LedgerReconciler, ReportRequest};
use builder_ledger::reports::{DEFAULT_DETAIL_FILE, DEFAULT_TOTALS_FILE};
use builder_ledger::{SortDirection, SortField};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "builder-ledger")]
#[command(about = "Reconcile builder withdrawals across indexer, spreadsheet and streaming-payment sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct WindowArgs {
    /// Start date filter (YYYY-MM-DD)
    #[arg(long, conflicts_with = "preset")]
    since: Option<String>,
    /// End date filter (YYYY-MM-DD)
    #[arg(long, requires = "since", conflicts_with = "preset")]
    until: Option<String>,
    /// Relative window (1m, 2m, 3m, 6m, 9m, 1y) or a calendar year (2025)
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consolidated per-payee withdrawal report
    Report {
        /// Accounting spreadsheet export (CSV), may be repeated
        #[arg(long = "sheet", value_name = "FILE")]
        sheets: Vec<PathBuf>,
        /// Include withdrawals from the on-chain indexer (default when no sheet is given)
        #[arg(long)]
        indexer: bool,
        #[command(flatten)]
        window: WindowArgs,
        /// Add streaming DAI accrued over the window
        #[arg(long)]
        streams: bool,
        /// Look up historical ETH prices for withdrawals without a fiat value
        #[arg(long)]
        prices: bool,
        /// Sort field
        #[arg(long, value_enum)]
        sort: Option<SortField>,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Write the detail CSV (defaults to the reports directory)
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        detail_csv: Option<Option<PathBuf>>,
        /// Write the totals CSV (defaults to the reports directory)
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        totals_csv: Option<Option<PathBuf>>,
        /// Show the first N payees
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List streaming payment schedules and their accruals
    Streams {
        #[command(flatten)]
        window: WindowArgs,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let json = match &cli.command {
        Some(Commands::Report { json, .. }) | Some(Commands::Streams { json, .. }) => *json,
        None => false,
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => return handle_error(e, json),
    };
    let _log_guard = init_logging(&config.logging, &config.paths.log_directory);

    let command = cli.command.unwrap_or(Commands::Streams {
        window: WindowArgs::default(),
        json: false,
    });

    match run(command, &config).await {
        Ok(()) => Ok(()),
        Err(e) => handle_error(e, json),
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    let today = chrono::Utc::now().date_naive();
    let reconciler = LedgerReconciler::new(config)?;

    match command {
        Commands::Report {
            sheets,
            indexer,
            window,
            streams,
            prices,
            sort,
            asc,
            json,
            detail_csv,
            totals_csv,
            limit,
        } => {
            let window = resolve_window(
                window.since.as_deref(),
                window.until.as_deref(),
                window.preset.as_deref(),
                config.aggregation.default_preset.as_deref(),
                today,
            )?;

            let mut sort_spec = config.aggregation.sort_spec();
            if let Some(field) = sort {
                sort_spec.field = field;
            }
            if asc {
                sort_spec.direction = SortDirection::Asc;
            }

            let reports_dir = &config.output.reports_dir;
            let request = ReportRequest {
                use_indexer: indexer || sheets.is_empty(),
                sheets,
                window,
                include_streams: streams || config.aggregation.include_streams,
                fetch_prices: prices || config.pricing.enabled,
                sort: sort_spec,
                json_output: json,
                limit,
                detail_csv: detail_csv.map(|p| p.unwrap_or_else(|| reports_dir.join(DEFAULT_DETAIL_FILE))),
                totals_csv: totals_csv.map(|p| p.unwrap_or_else(|| reports_dir.join(DEFAULT_TOTALS_FILE))),
            };

            let report = reconciler.run_report(&request).await?;
            reconciler
                .display_manager()
                .display_report(&report, request.limit, request.json_output);
        }
        Commands::Streams { window, json } => {
            let window = resolve_window(
                window.since.as_deref(),
                window.until.as_deref(),
                window.preset.as_deref(),
                config.aggregation.default_preset.as_deref(),
                today,
            )?;
            let as_of = window.map(|w| w.end()).unwrap_or(today);
            let rows = reconciler.streams().accruals(window.as_ref(), as_of);
            let label = window.map(|w| w.to_string());
            reconciler
                .display_manager()
                .display_streams(&rows, label.as_deref(), json);
        }
    }
    Ok(())
}

fn handle_error(e: anyhow::Error, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
    } else {
        eprintln!("Error: {e:#}");
    }
    process::exit(1);
}
