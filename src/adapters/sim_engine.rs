//! Deterministic whole-unit execution engine.
//!
//! Walks the price frame one date at a time, running the strategy pipeline
//! against a cash-and-holdings book. Holdings are marked at the last valid
//! price. Returns are measured against the previous close plus any capital
//! added during the period, and chained into a price index that starts at
//! 100 the day before the first date.

use chrono::{Duration, NaiveDate};
use statrs::statistics::Statistics;

use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;
use crate::domain::frequency::Frequency;
use crate::domain::pipeline::{Book, PeriodContext, Pipeline};
use crate::ports::engine_port::{
    CommissionModel, EngineRequest, EngineRun, EngineStats, ExecutionEngine,
};

const INDEX_BASE: f64 = 100.0;
const TRADING_DAYS: f64 = 252.0;

pub struct SimEngine;

impl SimEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct Holding {
    asset: String,
    quantity: f64,
}

struct SimBook<'a> {
    prices: &'a Frame,
    row: usize,
    cash: f64,
    holdings: Vec<Holding>,
    commission: CommissionModel,
    flows: f64,
}

impl<'a> SimBook<'a> {
    fn new(prices: &'a Frame, capital: f64, commission: Option<CommissionModel>) -> Self {
        SimBook {
            prices,
            row: 0,
            cash: capital,
            holdings: Vec::new(),
            commission: commission.unwrap_or_default(),
            flows: 0.0,
        }
    }

    fn quantity(&self, asset: &str) -> f64 {
        self.holdings
            .iter()
            .find(|h| h.asset == asset)
            .map_or(0.0, |h| h.quantity)
    }

    /// Last valid price at or before the current row.
    fn mark(&self, asset: &str) -> Option<f64> {
        let column = self.prices.column(asset)?;
        column.values[..=self.row]
            .iter()
            .rev()
            .copied()
            .find(|p| p.is_finite() && *p > 0.0)
    }

    fn holding_value(&self, asset: &str) -> f64 {
        let quantity = self.quantity(asset);
        if quantity == 0.0 {
            return 0.0;
        }
        self.mark(asset).map_or(0.0, |p| quantity * p)
    }

    fn value(&self) -> f64 {
        self.cash
            + self
                .holdings
                .iter()
                .map(|h| self.holding_value(&h.asset))
                .sum::<f64>()
    }

    /// Price to trade `asset` at on the current row.
    fn trade_price(&self, asset: &str) -> Result<f64, RuletraderError> {
        let column = self.prices.column(asset).ok_or_else(|| {
            RuletraderError::validation(format!("asset ID {asset} not in Data Table"))
        })?;
        match column.values[self.row] {
            p if p.is_finite() && p > 0.0 => Ok(p),
            p => Err(RuletraderError::validation(format!(
                "cannot allocate capital to {asset} because price is {p} as of {}",
                self.prices.dates[self.row]
            ))),
        }
    }

    fn fill(&mut self, asset: &str, quantity: f64, price: f64) {
        let fee = self.commission.fee(quantity, price);
        self.cash -= quantity * price + fee;
        match self.holdings.iter_mut().find(|h| h.asset == asset) {
            Some(h) => h.quantity += quantity,
            None => self.holdings.push(Holding {
                asset: asset.to_string(),
                quantity,
            }),
        }
        tracing::debug!(
            date = %self.prices.dates[self.row],
            asset = %asset,
            quantity,
            price,
            fee,
            "filled order"
        );
    }

    /// Move `amount` of capital into (or out of) `asset` in whole units.
    fn allocate(&mut self, asset: &str, amount: f64) -> Result<(), RuletraderError> {
        if amount == 0.0 {
            return Ok(());
        }
        let price = self.trade_price(asset)?;
        let position = self.quantity(asset);

        let mut quantity = if position != 0.0 && amount == -(position * price) {
            -position
        } else {
            let raw = amount / price;
            if position > 0.0 || (position == 0.0 && amount > 0.0) {
                raw.floor()
            } else {
                raw.ceil()
            }
        };

        if quantity > 0.0 {
            let CommissionModel { per_trade, pct } = self.commission;
            let affordable = ((amount - per_trade) / (price * (1.0 + pct))).floor().max(0.0);
            quantity = quantity.min(affordable);
            while quantity > 0.0 && quantity * price + self.commission.fee(quantity, price) > amount {
                quantity -= 1.0;
            }
        }

        if quantity != 0.0 {
            self.fill(asset, quantity, price);
        }
        Ok(())
    }

    /// Per-holding `(quantity, value share)` in first-allocation order.
    fn snapshot(&self) -> Vec<(f64, f64)> {
        let total = self.value();
        self.holdings
            .iter()
            .map(|h| {
                let share = if total != 0.0 {
                    self.holding_value(&h.asset) / total
                } else {
                    0.0
                };
                (h.quantity, share)
            })
            .collect()
    }
}

impl Book for SimBook<'_> {
    fn weight(&self, asset: &str) -> f64 {
        let total = self.value();
        if total == 0.0 {
            return 0.0;
        }
        self.holding_value(asset) / total
    }

    fn children(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.asset.clone()).collect()
    }

    fn close(&mut self, asset: &str) -> Result<(), RuletraderError> {
        let position = self.quantity(asset);
        if position == 0.0 {
            return Ok(());
        }
        match self.mark(asset) {
            Some(price) => self.fill(asset, -position, price),
            None => {
                tracing::warn!(asset = %asset, "closing position with no valid price; written off");
                if let Some(h) = self.holdings.iter_mut().find(|h| h.asset == asset) {
                    h.quantity = 0.0;
                }
            }
        }
        Ok(())
    }

    fn rebalance(&mut self, targets: &[(String, f64)]) -> Result<(), RuletraderError> {
        let stale: Vec<String> = self
            .holdings
            .iter()
            .filter(|h| h.quantity != 0.0 && !targets.iter().any(|(name, _)| *name == h.asset))
            .map(|h| h.asset.clone())
            .collect();
        for asset in stale {
            self.close(&asset)?;
        }

        let base = self.value();
        for (asset, target) in targets {
            if *target == 0.0 {
                self.close(asset)?;
                continue;
            }
            let delta = target - self.weight(asset);
            self.allocate(asset, delta * base)?;
        }
        Ok(())
    }

    fn adjust_capital(&mut self, amount: f64) {
        self.cash += amount;
        self.flows += amount;
    }
}

impl ExecutionEngine for SimEngine {
    fn run(&self, request: EngineRequest) -> Result<EngineRun, RuletraderError> {
        if let Some(step) = request.composite.first_optimising_step() {
            return Err(RuletraderError::UnsupportedStep {
                step: step.name().to_string(),
            });
        }
        let prices = &request.prices;
        let first = *prices
            .dates
            .first()
            .ok_or_else(|| RuletraderError::validation("price history is empty"))?;

        let mut book = SimBook::new(prices, request.initial_capital, request.commission);
        let mut pipeline = Pipeline::new(&request.composite);

        let mut equity = vec![(first - Duration::days(1), INDEX_BASE)];
        let mut index = INDEX_BASE;
        let mut last_value = request.initial_capital;
        let mut snapshots = Vec::with_capacity(prices.len());

        for row in 0..prices.len() {
            book.row = row;
            book.flows = 0.0;
            pipeline.run_period(&PeriodContext { row, prices }, &mut book)?;

            let value = book.value();
            let basis = last_value + book.flows;
            if basis != 0.0 {
                index *= value / basis;
            }
            equity.push((prices.dates[row], index));
            last_value = value;
            snapshots.push(book.snapshot());
        }

        let children = book.children();
        let column = |pick: fn(&(f64, f64)) -> f64, i: usize| -> Vec<f64> {
            snapshots
                .iter()
                .map(|snap| snap.get(i).map_or(0.0, pick))
                .collect()
        };
        let positions = Frame::from_columns(
            prices.dates.clone(),
            children
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), column(|s| s.0, i)))
                .collect(),
        )?;
        let security_weights = Frame::from_columns(
            prices.dates.clone(),
            children
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), column(|s| s.1, i)))
                .collect(),
        )?;

        let stats = compute_stats(&equity, request.risk_free_rate);
        tracing::info!(
            periods = prices.len(),
            holdings = children.len(),
            final_index = index,
            "simulation finished"
        );

        Ok(EngineRun {
            positions,
            prices: request.prices.clone(),
            security_weights,
            equity,
            stats,
        })
    }
}

fn returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .filter(|r| r.is_finite())
        .collect()
}

/// Annualised Sharpe ratio of period returns over a risk-free rate.
fn sharpe(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let rf = (1.0 + risk_free_rate).powf(1.0 / periods_per_year) - 1.0;
    let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
    let sd = excess.iter().std_dev();
    if !sd.is_finite() || sd == 0.0 {
        return None;
    }
    Some(excess.iter().mean() / sd * periods_per_year.sqrt())
}

/// Last value in each `frequency` bucket.
fn period_ends(equity: &[(NaiveDate, f64)], frequency: Frequency) -> Vec<f64> {
    let mut out: Vec<(NaiveDate, f64)> = Vec::new();
    for (date, value) in equity {
        let bucket = frequency.bucket(*date);
        match out.last_mut() {
            Some((b, v)) if *b == bucket => *v = *value,
            _ => out.push((bucket, *value)),
        }
    }
    out.into_iter().map(|(_, v)| v).collect()
}

fn compute_stats(equity: &[(NaiveDate, f64)], risk_free_rate: f64) -> EngineStats {
    let values: Vec<f64> = equity.iter().map(|(_, v)| *v).collect();
    let (Some(&(start_date, start)), Some(&(end_date, end))) = (equity.first(), equity.last()) else {
        return EngineStats::default();
    };

    let total_return = (start != 0.0).then(|| end / start - 1.0);
    let years = (end_date - start_date).num_days() as f64 / 365.25;
    let cagr = (start > 0.0 && years > 0.0).then(|| (end / start).powf(1.0 / years) - 1.0);

    let monthly = returns(&period_ends(equity, Frequency::Monthly));
    let yearly = returns(&period_ends(equity, Frequency::Yearly));
    let yearly_vol = (yearly.len() >= 2).then(|| yearly.iter().std_dev());

    let mut peak = f64::NEG_INFINITY;
    let drawdown: Vec<(NaiveDate, f64)> = equity
        .iter()
        .map(|(date, v)| {
            peak = peak.max(*v);
            (*date, if peak > 0.0 { v / peak - 1.0 } else { 0.0 })
        })
        .collect();
    let max_drawdown = drawdown.iter().map(|(_, d)| *d).reduce(f64::min);

    EngineStats {
        total_return,
        cagr,
        yearly_vol,
        daily_sharpe: sharpe(&returns(&values), risk_free_rate, TRADING_DAYS),
        monthly_sharpe: sharpe(&monthly, risk_free_rate, 12.0),
        yearly_sharpe: sharpe(&yearly, risk_free_rate, 1.0),
        max_drawdown,
        drawdown,
    }
}
