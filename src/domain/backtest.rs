//! Backtest orchestration.
//!
//! `run_portfolio` aligns the inputs, assembles the strategy composite and
//! hands it to an execution engine. `run_composite` treats finished runs as
//! assets of a second strategy.

use chrono::NaiveDate;

use crate::domain::composition::{Composite, CompositionBuilder, StepDescriptor};
use crate::domain::data_table::{DataTable, SeriesInput};
use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;
use crate::domain::frequency::Frequency;
use crate::domain::performance::{self, PerformanceReport};
use crate::domain::strategy::StrategyDefinition;
use crate::ports::engine_port::{CommissionModel, EngineRequest, EngineRun, ExecutionEngine};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 1_000_000.0;
pub const DEFAULT_VAR_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    /// Defaults to the first aligned date.
    pub start_date: Option<NaiveDate>,
    /// Defaults to the last aligned date.
    pub end_date: Option<NaiveDate>,
    pub initial_capital: f64,
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub risk_free_rate: f64,
    pub var_alpha: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            start_date: None,
            end_date: None,
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            risk_free_rate: 0.0,
            var_alpha: DEFAULT_VAR_ALPHA,
        }
    }
}

impl BacktestConfig {
    pub fn commission(&self) -> Option<CommissionModel> {
        if self.commission_per_trade == 0.0 && self.commission_pct == 0.0 {
            None
        } else {
            Some(CommissionModel {
                per_trade: self.commission_per_trade,
                pct: self.commission_pct,
            })
        }
    }

    /// `frame` restricted to `[start_date, end_date]`.
    pub fn window(&self, frame: &Frame) -> Frame {
        match (frame.dates.first(), frame.dates.last()) {
            (Some(first), Some(last)) => frame.between(
                self.start_date.unwrap_or(*first),
                self.end_date.unwrap_or(*last),
            ),
            _ => frame.clone(),
        }
    }
}

/// Align inputs, registering every asset as an indicator of itself.
pub fn build_table(
    assets: Vec<SeriesInput>,
    mut indicators: Vec<SeriesInput>,
) -> Result<DataTable, RuletraderError> {
    for asset in &assets {
        if !indicators.iter().any(|i| i.name == asset.name) {
            indicators.push(asset.clone());
        }
    }
    DataTable::build(assets, indicators)
}

fn request(
    table: &DataTable,
    composite: Composite,
    config: &BacktestConfig,
) -> Result<EngineRequest, RuletraderError> {
    let prices = config.window(&table.asset);
    if prices.is_empty() {
        return Err(RuletraderError::validation(format!(
            "no data between {} and {}",
            config
                .start_date
                .map_or_else(|| "start".to_string(), |d| d.to_string()),
            config
                .end_date
                .map_or_else(|| "end".to_string(), |d| d.to_string()),
        )));
    }
    Ok(EngineRequest {
        composite,
        prices,
        initial_capital: config.initial_capital,
        commission: config.commission(),
        risk_free_rate: config.risk_free_rate,
    })
}

pub fn run_portfolio(
    engine: &dyn ExecutionEngine,
    definition: &StrategyDefinition,
    assets: Vec<SeriesInput>,
    indicators: Vec<SeriesInput>,
    config: &BacktestConfig,
) -> Result<EngineRun, RuletraderError> {
    let table = build_table(assets, indicators)?;
    let actions = definition.actions()?;
    let composite = CompositionBuilder::new(definition.name.as_str()).build_from_descriptors(
        &table,
        &definition.pipeline(),
        &actions,
    )?;
    let request = request(&table, composite, config)?;
    tracing::info!(
        strategy = %definition.name,
        periods = request.prices.len(),
        assets = request.prices.columns.len(),
        "running portfolio backtest"
    );
    engine.run(request)
}

/// `run_portfolio` followed by the performance report.
pub fn run_backtest(
    engine: &dyn ExecutionEngine,
    definition: &StrategyDefinition,
    assets: Vec<SeriesInput>,
    indicators: Vec<SeriesInput>,
    config: &BacktestConfig,
) -> Result<PerformanceReport, RuletraderError> {
    let run = run_portfolio(engine, definition, assets, indicators, config)?;
    performance::build_report(&run, config.var_alpha)
}

/// Run a strategy whose assets are the equity indices of finished runs.
pub fn run_composite(
    engine: &dyn ExecutionEngine,
    name: &str,
    children: &[(String, EngineRun)],
    steps: &[StepDescriptor],
    config: &BacktestConfig,
) -> Result<EngineRun, RuletraderError> {
    if children.is_empty() {
        return Err(RuletraderError::validation("backtests not in params"));
    }
    let assets = children
        .iter()
        .map(|(child, run)| SeriesInput::new(child.as_str(), Frequency::Daily, run.equity.clone()))
        .collect();
    let table = build_table(assets, Vec::new())?;
    let composite = CompositionBuilder::new(name).build_from_descriptors(&table, steps, &[])?;
    let request = request(&table, composite, config)?;
    tracing::info!(
        strategy = %name,
        children = children.len(),
        periods = request.prices.len(),
        "running composite backtest"
    );
    engine.run(request)
}
