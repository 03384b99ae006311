//! Execution engine port.
//!
//! An engine turns a `Composite` and a price matrix into fills, commissions
//! and an equity index. The domain reads only the outputs declared here.

use chrono::NaiveDate;

use crate::domain::composition::Composite;
use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;

/// Fee charged per fill: a flat amount plus a share of the notional.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommissionModel {
    pub per_trade: f64,
    pub pct: f64,
}

impl CommissionModel {
    pub fn fee(&self, quantity: f64, price: f64) -> f64 {
        if quantity == 0.0 {
            return 0.0;
        }
        self.per_trade + self.pct * (quantity * price).abs()
    }
}

#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub composite: Composite,
    /// Asset prices, already restricted to the backtest window.
    pub prices: Frame,
    pub initial_capital: f64,
    pub commission: Option<CommissionModel>,
    pub risk_free_rate: f64,
}

/// Summary statistics of one run; `None` where a statistic is undefined.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineStats {
    pub total_return: Option<f64>,
    pub cagr: Option<f64>,
    pub yearly_vol: Option<f64>,
    pub daily_sharpe: Option<f64>,
    pub monthly_sharpe: Option<f64>,
    pub yearly_sharpe: Option<f64>,
    pub max_drawdown: Option<f64>,
    /// Fractional drawdown of the equity index from its running peak.
    pub drawdown: Vec<(NaiveDate, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    /// Units held per asset at the close of each period.
    pub positions: Frame,
    pub prices: Frame,
    /// Value share per asset at the close of each period.
    pub security_weights: Frame,
    /// Strategy price index, starting at 100 the day before the first period.
    pub equity: Vec<(NaiveDate, f64)>,
    pub stats: EngineStats,
}

pub trait ExecutionEngine {
    fn run(&self, request: EngineRequest) -> Result<EngineRun, RuletraderError>;
}
