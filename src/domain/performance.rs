//! Performance statistics over reconstructed trades and the equity index.
//!
//! Trade ratios follow the usual definitions (win rate, profit factor,
//! payoff ratio, Kelly fraction). Each returns `ComputationUndefined` where
//! its denominator vanishes; only `build_report` turns that into a
//! diagnostic report instead of an error.

use chrono::NaiveDate;
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;

use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;
use crate::domain::params::DATE_FORMAT;
use crate::domain::series;
use crate::domain::trade::{self, Trade};
use crate::ports::engine_port::{EngineRun, EngineStats};

pub const NO_SIGNAL_MESSAGE: &str = "warnings: no any indicators meet the conditions";
pub const SUCCESS_MESSAGE: &str = "succeed";

/// A report value that may be unavailable; serialized as `"-"` when missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Value(f64),
    Missing,
}

impl Metric {
    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Missing => None,
        }
    }
}

impl From<Option<f64>> for Metric {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Metric::Value(v),
            _ => Metric::Missing,
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Value(v) => serializer.serialize_f64(*v),
            Metric::Missing => serializer.serialize_str("-"),
        }
    }
}

/// One dated row, serialized as `["YYYY-MM-DD", v1, v2, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedRow {
    pub date: NaiveDate,
    pub values: Vec<f64>,
}

impl Serialize for DatedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.values.len() + 1))?;
        seq.serialize_element(&self.date.format(DATE_FORMAT).to_string())?;
        for v in &self.values {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub profit_dropdown: f64,
    pub kelly: f64,
    pub sharp_ratio: Metric,
    pub return_of_investment: Metric,
    pub annualized_returns: Metric,
    pub yearly_volatility: Metric,
    pub value_at_risk: f64,
    pub equity: Vec<DatedRow>,
    pub dropdown: Vec<DatedRow>,
    pub weights: Vec<DatedRow>,
    pub trade_returns: Vec<f64>,
    pub win_rate: f64,
    pub trading_times: usize,
    pub profit_factor: f64,
    pub payoff_ratio: f64,
    pub message: String,
    pub max_dropdown: Metric,
}

impl PerformanceReport {
    pub fn is_success(&self) -> bool {
        self.message == SUCCESS_MESSAGE
    }
}

fn split(trades: &[Trade]) -> (Vec<f64>, Vec<f64>) {
    let wins = trades
        .iter()
        .map(|t| t.realized_value)
        .filter(|v| *v > 0.0)
        .collect();
    let losses = trades
        .iter()
        .map(|t| t.realized_value)
        .filter(|v| *v < 0.0)
        .collect();
    (wins, losses)
}

pub fn win_rate(trades: &[Trade]) -> Result<f64, RuletraderError> {
    if trades.is_empty() {
        return Err(RuletraderError::undefined("win_rate", "no trades"));
    }
    let wins = trades.iter().filter(|t| t.is_win()).count();
    Ok(wins as f64 / trades.len() as f64)
}

pub fn profit_factor(trades: &[Trade]) -> Result<f64, RuletraderError> {
    let (wins, losses) = split(trades);
    if losses.is_empty() {
        return Err(RuletraderError::undefined("profit_factor", "no losing trades"));
    }
    Ok(wins.iter().sum::<f64>() / losses.iter().sum::<f64>().abs())
}

pub fn payoff_ratio(trades: &[Trade]) -> Result<f64, RuletraderError> {
    let (wins, losses) = split(trades);
    if wins.is_empty() {
        return Err(RuletraderError::undefined("payoff_ratio", "no winning trades"));
    }
    if losses.is_empty() {
        return Err(RuletraderError::undefined("payoff_ratio", "no losing trades"));
    }
    Ok(wins.iter().mean() / losses.iter().mean().abs())
}

pub fn kelly(trades: &[Trade]) -> Result<f64, RuletraderError> {
    let p = win_rate(trades)?;
    let b = payoff_ratio(trades)?;
    Ok(p - (1.0 - p) / b)
}

/// Price minus its running maximum, after forward-filling gaps.
///
/// Leading gaps have no drawdown and never set the running maximum.
pub fn drawdown(prices: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut peak = f64::NEG_INFINITY;
    series::ffill(prices)
        .into_iter()
        .map(|p| {
            p.map(|p| {
                peak = peak.max(p);
                p - peak
            })
        })
        .collect()
}

/// Net change of the equity index over its largest absolute drawdown.
pub fn profit_dropdown(equity: &[(NaiveDate, f64)]) -> Result<f64, RuletraderError> {
    let values: Vec<Option<f64>> = equity
        .iter()
        .map(|(_, v)| Some(*v).filter(|x| x.is_finite()))
        .collect();
    let deepest = drawdown(&values)
        .into_iter()
        .flatten()
        .fold(0.0_f64, f64::min);
    if deepest == 0.0 {
        return Err(RuletraderError::undefined("profit_dropdown", "no drawdown"));
    }
    let first = values.iter().flatten().next().copied().unwrap_or(0.0);
    let last = series::ffill(&values).last().copied().flatten().unwrap_or(first);
    Ok((last - first) / deepest.abs())
}

/// Lower `alpha` quantile of a normal fitted to period returns of the equity index.
pub fn value_at_risk(equity: &[(NaiveDate, f64)], alpha: f64) -> Result<f64, RuletraderError> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(RuletraderError::validation("var_alpha should be between 0 and 1"));
    }
    let values: Vec<Option<f64>> = equity.iter().map(|(_, v)| Some(*v)).collect();
    let returns: Vec<f64> = series::pct_change(&values, 1)
        .into_iter()
        .flatten()
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return Err(RuletraderError::undefined(
            "value_at_risk",
            "fewer than two returns",
        ));
    }
    let mean = returns.iter().mean();
    let sd = returns.iter().std_dev();
    if sd <= 0.0 || !sd.is_finite() {
        return Err(RuletraderError::undefined("value_at_risk", "returns have no dispersion"));
    }
    let normal = Normal::new(mean, sd)
        .map_err(|e| RuletraderError::undefined("value_at_risk", e.to_string()))?;
    Ok(normal.inverse_cdf(alpha))
}

/// The finest defined Sharpe ratio: daily, then monthly, then yearly.
pub fn sharpe(stats: &EngineStats) -> Option<f64> {
    [stats.daily_sharpe, stats.monthly_sharpe, stats.yearly_sharpe]
        .into_iter()
        .flatten()
        .find(|v| v.is_finite())
}

fn rows(points: &[(NaiveDate, f64)]) -> Vec<DatedRow> {
    points
        .iter()
        .map(|(date, v)| DatedRow {
            date: *date,
            values: vec![*v],
        })
        .collect()
}

fn frame_rows(frame: &Frame) -> Vec<DatedRow> {
    frame
        .dates
        .iter()
        .enumerate()
        .map(|(i, date)| DatedRow {
            date: *date,
            values: frame.columns.iter().map(|c| c.values[i]).collect(),
        })
        .collect()
}

/// Full report for a run whose trades have already been reconstructed.
pub fn report(
    run: &EngineRun,
    trades: &[Trade],
    alpha: f64,
) -> Result<PerformanceReport, RuletraderError> {
    Ok(PerformanceReport {
        profit_dropdown: profit_dropdown(&run.equity)?,
        kelly: kelly(trades)?,
        sharp_ratio: sharpe(&run.stats).into(),
        return_of_investment: run.stats.total_return.into(),
        annualized_returns: run.stats.cagr.into(),
        yearly_volatility: run.stats.yearly_vol.into(),
        value_at_risk: value_at_risk(&run.equity, alpha)?,
        equity: rows(&run.equity),
        dropdown: rows(&run.stats.drawdown),
        weights: frame_rows(&run.security_weights),
        trade_returns: trades.iter().map(|t| t.realized_value).collect(),
        win_rate: win_rate(trades)?,
        trading_times: trade::trading_times(&run.positions),
        profit_factor: profit_factor(trades)?,
        payoff_ratio: payoff_ratio(trades)?,
        message: SUCCESS_MESSAGE.to_string(),
        max_dropdown: run.stats.max_drawdown.into(),
    })
}

/// Zero-valued report carrying `message`.
pub fn diagnostic(message: impl Into<String>) -> PerformanceReport {
    PerformanceReport {
        profit_dropdown: 0.0,
        kelly: 0.0,
        sharp_ratio: Metric::Value(0.0),
        return_of_investment: Metric::Value(0.0),
        annualized_returns: Metric::Value(0.0),
        yearly_volatility: Metric::Value(0.0),
        value_at_risk: 0.0,
        equity: Vec::new(),
        dropdown: Vec::new(),
        weights: Vec::new(),
        trade_returns: Vec::new(),
        win_rate: 0.0,
        trading_times: 0,
        profit_factor: 0.0,
        payoff_ratio: 0.0,
        message: message.into(),
        max_dropdown: Metric::Value(0.0),
    }
}

/// Reconstruct trades and report on them, degrading to a diagnostic report
/// when there are no trades or a statistic is undefined.
///
/// Every [`RuletraderError::ComputationUndefined`] becomes the diagnostic,
/// not just the trade ratios: an equity curve that never draws down leaves
/// `profit_dropdown` undefined, and flat returns leave `value_at_risk`
/// undefined. The diagnostic message is the error text. Other errors
/// propagate.
pub fn build_report(run: &EngineRun, alpha: f64) -> Result<PerformanceReport, RuletraderError> {
    let trades = trade::reconstruct(&run.positions, &run.prices)?;
    if trades.is_empty() {
        tracing::warn!("no closed trades; returning diagnostic report");
        return Ok(diagnostic(NO_SIGNAL_MESSAGE));
    }
    match report(run, &trades, alpha) {
        Ok(report) => {
            tracing::info!(
                trades = trades.len(),
                win_rate = report.win_rate,
                "built performance report"
            );
            Ok(report)
        }
        Err(err @ RuletraderError::ComputationUndefined { .. }) => {
            tracing::warn!(error = %err, "statistic undefined; returning diagnostic report");
            Ok(diagnostic(err.to_string()))
        }
        Err(err) => Err(err),
    }
}
