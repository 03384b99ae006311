//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_adapter::JsonAdapter;
use crate::adapters::sim_engine::SimEngine;
use crate::domain::action_merger;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, DEFAULT_INITIAL_CAPITAL, DEFAULT_VAR_ALPHA};
use crate::domain::config_validation::{parse_date, validate_backtest_config};
use crate::domain::data_table::SeriesInput;
use crate::domain::error::RuletraderError;
use crate::domain::frequency::Frequency;
use crate::domain::performance::{Metric, PerformanceReport};
use crate::domain::rule_eval;
use crate::domain::strategy::StrategyDefinition;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "ruletrader", about = "Rule-driven trading strategy backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest and write the JSON report
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print each rule's trigger dates and the merged target schedule
    Signals {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Validate a strategy file
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            strategy,
            output,
        } => run_backtest(&config, &strategy, output.as_ref()),
        Command::Signals { config, strategy } => run_signals(&config, &strategy),
        Command::Validate { strategy } => run_validate(&strategy),
    }
}

fn fail(err: &RuletraderError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

pub fn load_strategy(path: &Path) -> Result<StrategyDefinition, ExitCode> {
    let definition = JsonAdapter::new().load_strategy(path).map_err(|e| fail(&e))?;
    definition.validate().map_err(|e| fail(&e))?;
    Ok(definition)
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, RuletraderError> {
    Ok(BacktestConfig {
        start_date: parse_date(adapter, "start_date")?,
        end_date: parse_date(adapter, "end_date")?,
        initial_capital: adapter.get_double("backtest", "initial_capital", DEFAULT_INITIAL_CAPITAL),
        commission_per_trade: adapter.get_double("backtest", "commission_per_trade", 0.0),
        commission_pct: adapter.get_double("backtest", "commission_pct", 0.0),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", 0.0),
        var_alpha: adapter.get_double("backtest", "var_alpha", DEFAULT_VAR_ALPHA),
    })
}

/// Config assets first, then any extra asset the strategy declares.
pub fn resolve_assets(config: &dyn ConfigPort, definition: &StrategyDefinition) -> Vec<String> {
    let mut assets = config.get_list("backtest", "assets");
    for asset in &definition.assets {
        if !assets.contains(asset) {
            assets.push(asset.clone());
        }
    }
    assets
}

/// Frequency override for `id`, else the data default, else daily.
pub fn series_frequency(config: &dyn ConfigPort, id: &str) -> Result<Frequency, RuletraderError> {
    match config
        .get_string("frequency", &id.to_lowercase())
        .or_else(|| config.get_string("data", "default_frequency"))
    {
        Some(code) => code.parse(),
        None => Ok(Frequency::Daily),
    }
}

/// Fetch every asset and every indicator that is not also an asset.
pub fn load_series(
    data_port: &dyn DataPort,
    config: &dyn ConfigPort,
    definition: &StrategyDefinition,
) -> Result<(Vec<SeriesInput>, Vec<SeriesInput>), RuletraderError> {
    let assets = resolve_assets(config, definition);
    let mut indicator_ids = config.get_list("indicators", "ids");
    for id in definition.indicator_ids()? {
        if !indicator_ids.contains(&id) {
            indicator_ids.push(id);
        }
    }
    indicator_ids.retain(|id| !assets.contains(id));

    let fetch = |id: &String| data_port.fetch_series(id, series_frequency(config, id)?);
    let asset_series = assets.iter().map(fetch).collect::<Result<Vec<_>, _>>()?;
    let indicator_series = indicator_ids.iter().map(fetch).collect::<Result<Vec<_>, _>>()?;
    tracing::info!(
        assets = asset_series.len(),
        indicators = indicator_series.len(),
        "loaded input series"
    );
    Ok((asset_series, indicator_series))
}

/// The definition with the resolved asset list filled in.
fn with_assets(config: &dyn ConfigPort, definition: &StrategyDefinition) -> StrategyDefinition {
    StrategyDefinition {
        assets: resolve_assets(config, definition),
        ..definition.clone()
    }
}

fn data_port(config: &dyn ConfigPort) -> CsvAdapter {
    let directory = config
        .get_string("data", "directory")
        .unwrap_or_else(|| ".".to_string());
    CsvAdapter::new(PathBuf::from(directory))
}

fn run_backtest(config_path: &Path, strategy_path: &Path, output_path: Option<&PathBuf>) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter) {
        return fail(&e);
    }

    // Stage 2: Load and validate strategy
    eprintln!("Loading strategy from {}", strategy_path.display());
    let definition = match load_strategy(strategy_path) {
        Ok(d) => d,
        Err(code) => return code,
    };

    // Stage 3: Build BacktestConfig
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    run_backtest_pipeline(
        &data_port(&adapter),
        &adapter,
        &definition,
        &bt_config,
        output_path,
    )
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    config: &dyn ConfigPort,
    definition: &StrategyDefinition,
    bt_config: &BacktestConfig,
    output_path: Option<&PathBuf>,
) -> ExitCode {
    // Stage 4: Fetch series
    let definition = with_assets(config, definition);
    let (assets, indicators) = match load_series(data_port, config, &definition) {
        Ok(series) => series,
        Err(e) => return fail(&e),
    };

    // Stage 5: Run backtest and build the report
    eprintln!(
        "Running backtest: {} ({} assets, {} indicators)",
        definition.name,
        assets.len(),
        indicators.len()
    );
    let engine = SimEngine::new();
    let report = match backtest_engine::run_backtest(&engine, &definition, assets, indicators, bt_config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    // Stage 6: Console summary
    print_summary(&report);

    // Stage 7: Write report
    let output = output_path
        .cloned()
        .unwrap_or_else(|| PathBuf::from("report.json"));
    let output_str = output.display().to_string();
    match JsonAdapter::new().write(&report, &output_str) {
        Ok(()) => {
            eprintln!("\nReport written to: {output_str}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn pct(metric: Metric) -> String {
    match metric {
        Metric::Value(v) => format!("{:.2}%", v * 100.0),
        Metric::Missing => "-".to_string(),
    }
}

fn ratio(metric: Metric) -> String {
    match metric {
        Metric::Value(v) => format!("{v:.2}"),
        Metric::Missing => "-".to_string(),
    }
}

fn print_summary(report: &PerformanceReport) {
    eprintln!("\n=== Results ===");
    eprintln!("Message:          {}", report.message);
    eprintln!("Total Return:     {}", pct(report.return_of_investment));
    eprintln!("Annualized:       {}", pct(report.annualized_returns));
    eprintln!("Yearly Vol:       {}", pct(report.yearly_volatility));
    eprintln!("Sharpe Ratio:     {}", ratio(report.sharp_ratio));
    eprintln!("Max Drawdown:     {}", pct(report.max_dropdown));
    eprintln!("Profit/Drawdown:  {:.2}", report.profit_dropdown);
    eprintln!("Value at Risk:    {:.4}", report.value_at_risk);
    eprintln!("Trades:           {}", report.trade_returns.len());
    eprintln!("Trading Times:    {}", report.trading_times);
    eprintln!("Win Rate:         {:.1}%", report.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", report.profit_factor);
    eprintln!("Payoff Ratio:     {:.2}", report.payoff_ratio);
    eprintln!("Kelly:            {:.2}", report.kelly);
}

fn run_signals(config_path: &Path, strategy_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter) {
        return fail(&e);
    }
    let definition = match load_strategy(strategy_path) {
        Ok(d) => d,
        Err(code) => return code,
    };
    match print_signals(&data_port(&adapter), &adapter, &definition) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

/// Print trigger dates per rule, then the dates each asset's target changes.
pub fn print_signals(
    data_port: &dyn DataPort,
    config: &dyn ConfigPort,
    definition: &StrategyDefinition,
) -> Result<(), RuletraderError> {
    let definition = with_assets(config, definition);
    let (assets, indicators) = load_series(data_port, config, &definition)?;
    let table = backtest_engine::build_table(assets, indicators)?;
    let actions = definition.actions()?;

    for (i, action) in actions.iter().enumerate() {
        let dates = rule_eval::evaluate(&table, &action.rule)?;
        println!(
            "rule {i}: {} {} on {}",
            action.side.as_str(),
            action.asset_id,
            action.rule
        );
        for date in dates {
            println!("  {date}");
        }
    }

    let schedule = action_merger::merge(&table, &actions)?;
    println!("\ntarget changes:");
    for column in &schedule.columns {
        let mut previous = 0.0;
        for (date, value) in schedule.dates.iter().zip(&column.values) {
            if *value != previous {
                println!("  {date} {} {value:+}", column.name);
                previous = *value;
            }
        }
    }
    Ok(())
}

fn run_validate(strategy_path: &Path) -> ExitCode {
    eprintln!("Validating strategy: {}", strategy_path.display());
    let definition = match load_strategy(strategy_path) {
        Ok(d) => d,
        Err(code) => return code,
    };

    eprintln!("\nStrategy: {} ({})", definition.name, definition.frequency);
    eprintln!("Assets:   {}", definition.assets.join(", "));

    let actions = match definition.actions() {
        Ok(a) => a,
        Err(e) => return fail(&e),
    };
    eprintln!("\nRules:");
    for action in &actions {
        eprintln!("  {} {}: {}", action.side.as_str(), action.asset_id, action.rule);
    }

    eprintln!("\nSteps:");
    for step in definition.pipeline() {
        eprintln!("  {}", step.class);
    }

    eprintln!("\nStrategy is valid.");
    ExitCode::SUCCESS
}
