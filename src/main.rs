//! Flashtest CLI
//!
//! Terminal front end for the backtest backend: submit a strategy, watch it
//! run, inspect results, and compare finished backtests side by side.
//!
//! # Usage
//!
//! ```bash
//! flashtest login --username alice
//! flashtest submit --name momentum-v1 \
//!   --prompt "Buy stocks with positive momentum, hold 30 days" \
//!   --tickers AAPL,MSFT --start 2020-01-01 --end 2021-01-01 \
//!   --cash 100000 --watch
//! flashtest results <BACKTEST_ID>
//! flashtest compare <ID1> <ID2> --csv comparison.csv
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Backtest failed, partial results, or connectivity lost
//! - 2: Validation or configuration error

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flashtest_client::client::BacktestClient;
use flashtest_client::compare::ComparisonAggregator;
use flashtest_client::config::Config;
use flashtest_client::error::ApiError;
use flashtest_client::hydrator::{HydratedResults, ResultHydrator};
use flashtest_client::models::{
    BacktestStatus, LoginCredentials, RegisterData, ReportFormat, Trade,
};
use flashtest_client::poller::{PollOutcome, ProgressEstimator, StatusPoller};
use flashtest_client::request::BacktestRequestBuilder;
use flashtest_client::session::Session;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "flashtest")]
#[command(about = "Run and inspect strategy backtests from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and persist the session token
    Login {
        #[arg(short, long)]
        username: String,
        /// Password (falls back to FLASHTEST_PASSWORD)
        #[arg(short, long, env = "FLASHTEST_PASSWORD")]
        password: String,
    },

    /// Register a new account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "FLASHTEST_PASSWORD")]
        password: String,
    },

    /// Drop the persisted session token
    Logout,

    /// Show the currently authenticated user
    Whoami,

    /// List tickers available for backtesting
    Tickers,

    /// Show the backend price database coverage
    Info,

    /// Submit a new backtest
    Submit {
        /// Display name for the run
        #[arg(long)]
        name: String,
        /// Strategy description
        #[arg(long)]
        prompt: String,
        /// Comma-separated ticker symbols
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,
        /// Start date, YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// End date, YYYY-MM-DD
        #[arg(long)]
        end: String,
        /// Initial capital
        #[arg(long, default_value = "100000")]
        cash: f64,
        /// Commission per trade, percent
        #[arg(long, default_value = "0.1")]
        commission: f64,
        /// Poll until the backtest finishes, then print results
        #[arg(long)]
        watch: bool,
    },

    /// Fetch the current status of a backtest
    Status { backtest_id: String },

    /// Poll a running backtest until it finishes (Ctrl-C to stop watching)
    Watch { backtest_id: String },

    /// Fetch and print results, trades, and returns for a completed backtest
    Results { backtest_id: String },

    /// Fetch just the trade list
    Trades { backtest_id: String },

    /// Fetch just the strategy-vs-benchmark returns series
    Returns { backtest_id: String },

    /// List all backtests for the current user
    List,

    /// Delete a backtest
    Delete { backtest_id: String },

    /// Download a rendered report
    Download {
        backtest_id: String,
        #[arg(long, value_enum, default_value = "csv")]
        format: ReportFormat,
        /// Output file (defaults to <id>.<format>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare up to 5 completed backtests side by side
    Compare {
        backtest_ids: Vec<String>,
        /// Also write the comparison table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashtest=info,flashtest_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let session = Arc::new(Session::with_token_file(&config.token_file));
    let client = Arc::new(BacktestClient::new(&config, session.clone())?);

    let code = match cli.command {
        Commands::Login { username, password } => {
            client
                .login(&LoginCredentials { username, password })
                .await?;
            println!("Logged in.");
            ExitCode::SUCCESS
        }

        Commands::Register {
            name,
            email,
            username,
            password,
        } => {
            client
                .register(&RegisterData {
                    name,
                    email,
                    username,
                    password,
                })
                .await?;
            println!("Registered and logged in.");
            ExitCode::SUCCESS
        }

        Commands::Logout => {
            session.clear()?;
            println!("Logged out.");
            ExitCode::SUCCESS
        }

        Commands::Whoami => {
            let user = client.me().await?;
            println!("{} <{}> role={}", user.username, user.email, user.role);
            ExitCode::SUCCESS
        }

        Commands::Tickers => {
            let tickers = client.tickers().await?;
            for ticker in &tickers {
                println!("{}", ticker);
            }
            info!(count = tickers.len(), "Tickers listed");
            ExitCode::SUCCESS
        }

        Commands::Info => {
            let db = client.database_info().await?;
            println!(
                "Price data coverage: {} .. {}",
                db.start_date.as_deref().unwrap_or("?"),
                db.end_date.as_deref().unwrap_or("?")
            );
            ExitCode::SUCCESS
        }

        Commands::Submit {
            name,
            prompt,
            tickers,
            start,
            end,
            cash,
            commission,
            watch,
        } => {
            let request = match BacktestRequestBuilder::new()
                .name(name)
                .prompt(prompt)
                .tickers(tickers)
                .start_date(start)
                .end_date(end)
                .initial_cash(cash)
                .commission(commission)
                .build()
            {
                Ok(request) => request,
                Err(e) => {
                    eprintln!("invalid request: {}", e);
                    return Ok(ExitCode::from(2));
                }
            };

            let status = client.submit(&request).await?;
            println!(
                "Submitted backtest {} ({})",
                status.backtest_id,
                status.state.as_str()
            );

            if watch {
                watch_backtest(&config, client.clone(), &status.backtest_id).await?
            } else {
                ExitCode::SUCCESS
            }
        }

        Commands::Status { backtest_id } => {
            let status = client.status(&backtest_id).await?;
            print_status(&status);
            ExitCode::SUCCESS
        }

        Commands::Watch { backtest_id } => {
            watch_backtest(&config, client.clone(), &backtest_id).await?
        }

        Commands::Results { backtest_id } => {
            let hydrator = ResultHydrator::new(client.clone(), config.poll_policy.clone());
            let hydrated = hydrator.hydrate(&backtest_id).await;
            print_hydrated(&hydrated);
            if hydrated.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }

        Commands::Trades { backtest_id } => {
            let trades = client.trades(&backtest_id).await?;
            println!("{} trades", trades.len());
            for trade in &trades {
                print_trade(trade);
            }
            ExitCode::SUCCESS
        }

        Commands::Returns { backtest_id } => {
            let returns = client.returns(&backtest_id).await?;
            for row in &returns {
                println!(
                    "{}  strategy {:>8.4}  benchmark {:>8.4}",
                    row.date, row.strategy_return, row.benchmark_return
                );
            }
            ExitCode::SUCCESS
        }

        Commands::List => {
            let backtests = client.list_backtests().await?;
            if backtests.is_empty() {
                println!("No backtests yet.");
            }
            for status in &backtests {
                print_status(status);
            }
            ExitCode::SUCCESS
        }

        Commands::Delete { backtest_id } => {
            let confirmation = client.delete(&backtest_id).await?;
            println!("{}", confirmation.message);
            ExitCode::SUCCESS
        }

        Commands::Download {
            backtest_id,
            format,
            output,
        } => {
            let bytes = client.download_report(&backtest_id, format).await?;
            let path = output.unwrap_or_else(|| {
                PathBuf::from(format!("{}.{}", backtest_id, format.as_str()))
            });
            std::fs::write(&path, &bytes)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), path.display());
            ExitCode::SUCCESS
        }

        Commands::Compare { backtest_ids, csv } => {
            let aggregator = ComparisonAggregator::new(client.clone(), config.poll_policy.clone());
            let set = match aggregator.fetch_all(&backtest_ids).await {
                Ok(set) => set,
                Err(e) => {
                    eprintln!("invalid selection: {}", e);
                    return Ok(ExitCode::from(2));
                }
            };

            let table = set.table();
            print!("{:<16}", "Metric");
            for id in &table.backtest_ids {
                print!(" {:>14}", truncate(id, 14));
            }
            println!();
            for row in &table.rows {
                print!("{:<16}", truncate(&row.label, 16));
                for value in &row.values {
                    match value {
                        Some(v) => print!(" {:>14.2}", v),
                        None => print!(" {:>14}", "N/A"),
                    }
                }
                println!();
            }

            for entry in set.entries() {
                if let Err(e) = &entry.outcome {
                    eprintln!("{}: {}", entry.backtest_id, e);
                }
            }

            if let Some(path) = csv {
                std::fs::write(&path, table.to_csv()?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote comparison CSV to {}", path.display());
            }

            if set.failed() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
    };

    Ok(code)
}

/// Poll until terminal, printing progress. Ctrl-C cancels the watch (the
/// backend job keeps running server-side).
async fn watch_backtest(
    config: &Config,
    client: Arc<BacktestClient>,
    backtest_id: &str,
) -> Result<ExitCode> {
    let (mut poller, cancel) = StatusPoller::new(client.clone(), config.poll_policy.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut progress = ProgressEstimator::new();
    let outcome = poller
        .run(backtest_id, |status| {
            let pct = progress.observe(status);
            println!("  {:>5.1}%  {}", pct, status.state.as_str());
        })
        .await;

    match outcome {
        PollOutcome::Completed(_) => {
            println!("  {:>5.1}%  completed", progress.complete());
            let hydrator = ResultHydrator::new(client, config.poll_policy.clone());
            let hydrated = hydrator.hydrate(backtest_id).await;
            print_hydrated(&hydrated);
            if hydrated.is_complete() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
        PollOutcome::Failed { message } => {
            eprintln!("Backtest failed: {}", message);
            Ok(ExitCode::from(1))
        }
        PollOutcome::ConnectivityLost { attempts, last_error } => {
            warn!(attempts, "Giving up on status polling: {}", last_error);
            eprintln!(
                "Connection error while checking status; the backtest may still be running. \
                 Retry later with: flashtest watch {}",
                backtest_id
            );
            Ok(ExitCode::from(1))
        }
        PollOutcome::Error(e) => {
            if e.is_unauthorized() {
                eprintln!("Session expired. Run `flashtest login` and try again.");
            } else {
                eprintln!("error: {}", e);
            }
            Ok(ExitCode::from(1))
        }
        PollOutcome::Cancelled => {
            println!("Stopped watching {} (it keeps running server-side).", backtest_id);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_status(status: &BacktestStatus) {
    let created = status
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!(
        "{:<24} {:<10} {:<17} {}",
        status.backtest_id,
        status.state.as_str(),
        created,
        status.message
    );
}

fn print_hydrated(hydrated: &HydratedResults) {
    match &hydrated.results {
        Ok(results) => {
            println!("\n== Metrics ==");
            println!("  Total return      {:>10.2}%", results.metrics.total_return);
            println!("  Annual return     {:>10.2}%", results.metrics.annual_return);
            println!("  Volatility        {:>10.2}%", results.metrics.volatility);
            println!("  Sharpe            {:>10.2}", results.metrics.sharpe);
            println!("  Sortino           {:>10.2}", results.metrics.sortino);
            println!("  Max drawdown      {:>10.2}%", results.metrics.max_drawdown);
            println!("  Win rate          {:>10.2}%", results.metrics.win_rate);
            println!("  Beta              {:>10.2}", results.metrics.beta);
            println!("  Alpha             {:>10.2}", results.metrics.alpha);
            for (name, value) in &results.metrics.additional {
                println!("  {:<17} {:>10.2}", name, value);
            }
            if !results.insights.is_empty() {
                println!("\n== Insights ==\n{}", results.insights);
            }
            if !results.improvements.is_empty() {
                println!("\n== Improvements ==\n{}", results.improvements);
            }
        }
        Err(e) => eprintln!("results: {}", e),
    }

    match &hydrated.trades {
        Ok(trades) => {
            println!("\n== Trades ({}) ==", trades.len());
            for trade in trades.iter().take(20) {
                print_trade(trade);
            }
            if trades.len() > 20 {
                println!("  ... {} more", trades.len() - 20);
            }
        }
        Err(e) => eprintln!("trades: {}", e),
    }

    match &hydrated.returns {
        Ok(returns) => println!("\n== Returns series: {} buckets ==", returns.len()),
        Err(e) => eprintln!("returns: {}", e),
    }
}

fn print_trade(trade: &Trade) {
    println!(
        "  {:<8} {:<6} {} -> {}  {:>9.2} -> {:>9.2}  pnl {:>10.2}  {:>7.2}%",
        trade.ticker,
        match trade.trade_type {
            flashtest_client::models::TradeType::Long => "long",
            flashtest_client::models::TradeType::Short => "short",
        },
        trade.entry_date,
        trade.exit_date,
        trade.entry_price,
        trade.exit_price,
        trade.pnl,
        trade.return_pct
    );
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}
