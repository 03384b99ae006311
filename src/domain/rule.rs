//! Rule specifications.
//!
//! - `RuleKind`: the closed set of signal rules with their numeric parameters
//! - `Direction`: entering (+1) or the mirror/closing condition (-1)
//! - `RuleSpec`: a validated rule bound to one indicator
//! - `Side`: what an action does to an asset's target weight
//! - `RuleWire`: the exchanged `{rule_kind, indicator_id, asset_id, side, params}` shape

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::RuletraderError;
use crate::domain::params::{coerce_id, ParamMap, Params};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn from_sign(sign: i64) -> Result<Self, RuletraderError> {
        match sign {
            1 => Ok(Direction::Long),
            -1 => Ok(Direction::Short),
            _ => Err(RuletraderError::validation("sign should be either 1 or -1")),
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    ThresholdBreach { threshold: f64, n: usize },
    ContinuousGrowth { n: usize },
    CumulativeReturnBreach { threshold: f64, n: usize },
    FixedDates { dates: Vec<NaiveDate> },
    MaCrossoverMa { ma1: usize, ma2: usize },
    MaCrossoverPrice { ma: usize },
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::ThresholdBreach { .. } => "threshold_breach",
            RuleKind::ContinuousGrowth { .. } => "continuous_growth",
            RuleKind::CumulativeReturnBreach { .. } => "cumulative_return_breach",
            RuleKind::FixedDates { .. } => "fixed_dates",
            RuleKind::MaCrossoverMa { .. } => "ma_crossover_ma",
            RuleKind::MaCrossoverPrice { .. } => "ma_crossover_price",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSpec {
    pub kind: RuleKind,
    pub indicator_id: String,
    pub direction: Direction,
}

impl RuleSpec {
    /// Validate and coerce a rule from its kind name, indicator id and parameters.
    pub fn parse(kind: &str, indicator_id: &Value, params: &ParamMap) -> Result<Self, RuletraderError> {
        let params = normalize_aliases(params);
        let p = Params::new(&params, kind);

        let kind = match kind {
            "threshold_breach" | "trade_at_threshold" => {
                p.require(&["threshold", "n", "sign"])?;
                RuleKind::ThresholdBreach {
                    threshold: p.float("threshold")?,
                    n: p.count("n", 1)?,
                }
            }
            "continuous_growth" => {
                p.require(&["n", "sign"])?;
                RuleKind::ContinuousGrowth { n: p.count("n", 1)? }
            }
            "cumulative_return_breach" | "cumulative_return_threshold" => {
                p.require(&["threshold", "n", "sign"])?;
                RuleKind::CumulativeReturnBreach {
                    threshold: p.float("threshold")?,
                    n: p.count("n", 1)?,
                }
            }
            "fixed_dates" | "specific_date" => {
                p.require(&["sign", "date"])?;
                RuleKind::FixedDates {
                    dates: p.date_list("date")?,
                }
            }
            "ma_crossover_ma" => {
                p.require(&["sign", "ma1", "ma2"])?;
                RuleKind::MaCrossoverMa {
                    ma1: p.count("ma1", 1)?,
                    ma2: p.count("ma2", 1)?,
                }
            }
            "ma_crossover_price" => {
                p.require(&["sign", "ma"])?;
                RuleKind::MaCrossoverPrice { ma: p.count("ma", 1)? }
            }
            other => {
                return Err(RuletraderError::validation(format!(
                    "no such rule kind {other}"
                )));
            }
        };

        let direction = Direction::from_sign(p.int("sign")?)?;
        let indicator_id = coerce_id(indicator_id)?;

        Ok(RuleSpec {
            kind,
            indicator_id,
            direction,
        })
    }
}

/// Accept the alternate spellings used by older rule files.
fn normalize_aliases(params: &ParamMap) -> ParamMap {
    const ALIASES: [(&str, &str); 4] = [
        ("direction", "sign"),
        ("dates", "date"),
        ("ma_1", "ma1"),
        ("ma_2", "ma2"),
    ];
    let mut out = params.clone();
    for (alias, canonical) in ALIASES {
        if !out.contains_key(canonical) {
            if let Some(v) = out.remove(alias) {
                out.insert(canonical.to_string(), v);
            }
        }
    }
    out
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = self.direction.sign();
        match &self.kind {
            RuleKind::ThresholdBreach { threshold, n } => write!(
                f,
                "threshold_breach({}, threshold={}, n={}, sign={})",
                self.indicator_id, threshold, n, sign
            ),
            RuleKind::ContinuousGrowth { n } => write!(
                f,
                "continuous_growth({}, n={}, sign={})",
                self.indicator_id, n, sign
            ),
            RuleKind::CumulativeReturnBreach { threshold, n } => write!(
                f,
                "cumulative_return_breach({}, threshold={}, n={}, sign={})",
                self.indicator_id, threshold, n, sign
            ),
            RuleKind::FixedDates { dates } => write!(
                f,
                "fixed_dates({}, {} dates, sign={})",
                self.indicator_id,
                dates.len(),
                sign
            ),
            RuleKind::MaCrossoverMa { ma1, ma2 } => write!(
                f,
                "ma_crossover_ma({}, ma1={}, ma2={}, sign={})",
                self.indicator_id, ma1, ma2, sign
            ),
            RuleKind::MaCrossoverPrice { ma } => write!(
                f,
                "ma_crossover_price({}, ma={}, sign={})",
                self.indicator_id, ma, sign
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
    Hold,
}

impl Side {
    /// Target exposure written by an action of this side.
    pub fn weight(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
            Side::Hold => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Hold => "hold",
        }
    }
}

impl FromStr for Side {
    type Err = RuletraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            "hold" => Ok(Side::Hold),
            other => Err(RuletraderError::validation(format!(
                "no such strategy {other}"
            ))),
        }
    }
}

/// One rule as exchanged in strategy files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleWire {
    #[serde(alias = "method")]
    pub rule_kind: String,
    pub indicator_id: Value,
    #[serde(default)]
    pub asset_id: Value,
    #[serde(alias = "strategy")]
    pub side: String,
    #[serde(default)]
    pub params: ParamMap,
}
