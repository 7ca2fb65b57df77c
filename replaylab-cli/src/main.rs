//! ReplayLab CLI — run historical replay backtests from TOML configs.
//!
//! Commands:
//! - `run` — execute a backtest (simple, walk_forward, or out_of_sample)
//! - `check` — validate a config file and print its run id

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use replaylab_core::bus::EventBus;
use replaylab_core::data::CsvBarStore;
use replaylab_core::data::WindowedRepository;
use replaylab_runner::config::BacktestConfig;
use replaylab_runner::engine::Backtester;
use replaylab_runner::pipeline::{MaCrossoverSignals, NaiveRiskManager, PaperOrderManager};
use replaylab_runner::result::BacktestResult;

#[derive(Parser)]
#[command(
    name = "replaylab",
    about = "ReplayLab CLI — event-driven backtest replay engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Directory of CSV bar archives ({symbol}_{broker}_{timeframe}.csv).
        #[arg(long, default_value = "data")]
        data: PathBuf,

        /// Write the full result as JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a config file and print its deterministic run id.
    Check {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            data,
            output,
        } => run_backtest(&config, data, output).await,
        Commands::Check { config } => check_config(&config),
    }
}

async fn run_backtest(
    config_path: &PathBuf,
    data_dir: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = BacktestConfig::from_toml_path(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let initial_capital = config.initial_capital;

    let store = Arc::new(CsvBarStore::new(data_dir));
    let repository = Arc::new(WindowedRepository::new(store));
    let bus = Arc::new(EventBus::new());
    let mut backtester = Backtester::new(
        config,
        Arc::clone(&bus),
        repository,
        Arc::new(MaCrossoverSignals::default()),
        Arc::new(NaiveRiskManager::default()),
        Arc::new(PaperOrderManager::new(initial_capital)),
    );

    let outcome = backtester.run().await;
    bus.stop().await;
    let result = outcome?;

    print_summary(&result);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&path, json)
            .with_context(|| format!("writing result to {}", path.display()))?;
        println!("Result saved to: {}", path.display());
    }
    Ok(())
}

fn check_config(config_path: &PathBuf) -> Result<()> {
    let config = BacktestConfig::from_toml_path(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    println!("Config OK: {}", config_path.display());
    println!("Run id: {}", config.run_id());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("=== Backtest Result ===");
    println!("Run id:         {}", result.config.run_id());
    println!("Mode:           {:?}", result.config.mode);
    println!(
        "Period:         {} to {}",
        result.config.start_date, result.config.end_date
    );
    println!("Trades:         {}", m.total_trades);
    println!();
    println!("--- Performance ---");
    println!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    println!("Net P&L:        {:.2}", m.total_pnl_net);
    println!("Profit Factor:  {:.2}", m.profit_factor);
    println!("Expectancy:     {:.2}", m.expectancy);
    println!("Sharpe:         {:.3}", m.sharpe_ratio);
    println!("Sortino:        {:.3}", m.sortino_ratio);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown_pct);
    println!("Avg R Multiple: {:.2}", m.avg_r_multiple);
    println!("Longest Win:    {}", m.longest_winning_streak);
    println!("Longest Loss:   {}", m.longest_losing_streak);

    if let Some(summary) = &result.wf_summary {
        println!();
        println!("--- Walk-Forward ---");
        println!(
            "Windows:        {}",
            result.wf_windows.as_ref().map_or(0, Vec::len)
        );
        println!("Avg Degradation:{:.2}", summary.avg_degradation_score);
        println!(
            "Profitable:     {:.0}%",
            summary.pct_windows_profitable * 100.0
        );
        println!("Verdict:        {:?}", summary.overall_verdict);
    }
    if let Some(report) = &result.oos_report {
        println!();
        println!("--- Out-of-Sample ---");
        println!("Sharpe Ratio:   {:.2}", report.is_vs_oos_sharpe_ratio);
        println!("PF Ratio:       {:.2}", report.is_vs_oos_profit_factor);
        println!("Verdict:        {:?}", report.verdict);
        for rec in &report.recommendations {
            println!("  - {rec}");
        }
    }
    println!();
}
