//! Pipeline step specifications and their assembly into a `Composite`.
//!
//! Steps arrive as `{"class": "<name>", "params": {...}}` descriptors and are
//! parsed through one match table into closed enums. A `Composite` is the
//! ordered step list handed to an execution engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::action_merger::{self, ActionSpec, WeightSchedule};
use crate::domain::data_table::DataTable;
use crate::domain::error::RuletraderError;
use crate::domain::params::{ParamMap, Params};
use crate::domain::rule::RuleWire;

/// Wire form of one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub class: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl StepDescriptor {
    pub fn new(class: impl Into<String>) -> Self {
        StepDescriptor {
            class: class.into(),
            params: ParamMap::new(),
        }
    }
}

/// Every step class the descriptor parser accepts.
pub const STEP_CLASSES: &[&str] = &[
    "run_once",
    "run_daily",
    "run_weekly",
    "run_monthly",
    "run_quarterly",
    "run_yearly",
    "run_on_date",
    "run_after_date",
    "run_after_days",
    "run_every_n_periods",
    "select_all",
    "select_these",
    "select_has_data",
    "select_n",
    "stat_total_return",
    "select_momentum",
    "weigh_equally",
    "weigh_specified",
    "weigh_specificed",
    "weigh_inverse_volatility",
    "weigh_erc",
    "weigh_mean_variance",
    "weigh_randomly",
    "weigh_target",
    "limit_deltas",
    "limit_weights",
    "target_volatility",
    "pte_rebalance",
    "capital_flow",
    "close_dead",
    "rebalance",
    "rebalance_over_time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    RunOnce,
    RunPeriod {
        period: Period,
        run_on_first_date: bool,
        run_on_end_of_period: bool,
        run_on_last_date: bool,
    },
    RunOnDate { dates: Vec<NaiveDate> },
    RunAfterDate { date: NaiveDate },
    RunAfterDays { days: usize },
    RunEveryNPeriods { n: usize, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All {
        include_no_data: bool,
    },
    These {
        tickers: Vec<String>,
        include_no_data: bool,
    },
    HasData {
        lookback_months: u32,
        min_count: Option<usize>,
        include_no_data: bool,
    },
    TopN {
        n: usize,
        sort_descending: bool,
        all_or_none: bool,
    },
    StatTotalReturn {
        lookback_months: u32,
        lag_days: u32,
    },
    Momentum {
        n: usize,
        lookback_months: u32,
        lag_days: u32,
        sort_descending: bool,
        all_or_none: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Weighing {
    Equally,
    Specified { weights: BTreeMap<String, f64> },
    InverseVolatility { params: ParamMap },
    Erc { params: ParamMap },
    MeanVariance { params: ParamMap },
    Randomly {
        bounds: (f64, f64),
        weight_sum: f64,
        seed: Option<u64>,
    },
    Target { schedule: WeightSchedule },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskLimit {
    LimitDeltas { limit: f64 },
    LimitWeights { limit: f64 },
    TargetVolatility { target_volatility: f64, params: ParamMap },
    PteRebalance {
        pte_volatility_cap: f64,
        target_weights: Value,
        params: ParamMap,
    },
    CapitalFlow { amount: f64 },
    CloseDead,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rebalancing {
    Rebalance,
    OverTime { n: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    Schedule(Schedule),
    Selection(Selection),
    Weighing(Weighing),
    RiskLimit(RiskLimit),
    Rebalance(Rebalancing),
}

/// What a descriptor may draw on while being parsed.
pub struct StepContext<'a> {
    pub table: &'a DataTable,
    /// Rules used by `weigh_target` when its params carry no `action` list.
    pub actions: &'a [ActionSpec],
}

impl StepSpec {
    pub fn from_descriptor(
        descriptor: &StepDescriptor,
        ctx: &StepContext<'_>,
    ) -> Result<Self, RuletraderError> {
        let class = descriptor.class.as_str();
        let p = Params::new(&descriptor.params, class);

        let spec = match class {
            "run_once" => StepSpec::Schedule(Schedule::RunOnce),
            "run_daily" => run_period(&p, Period::Daily)?,
            "run_weekly" => run_period(&p, Period::Weekly)?,
            "run_monthly" => run_period(&p, Period::Monthly)?,
            "run_quarterly" => run_period(&p, Period::Quarterly)?,
            "run_yearly" => run_period(&p, Period::Yearly)?,
            "run_on_date" => {
                p.require(&["dates"])?;
                StepSpec::Schedule(Schedule::RunOnDate {
                    dates: p.date_list("dates")?,
                })
            }
            "run_after_date" => {
                p.require(&["date"])?;
                StepSpec::Schedule(Schedule::RunAfterDate { date: p.date("date")? })
            }
            "run_after_days" => {
                p.require(&["days"])?;
                StepSpec::Schedule(Schedule::RunAfterDays {
                    days: p.count("days", 0)?,
                })
            }
            "run_every_n_periods" => {
                p.require(&["n", "offset"])?;
                let n = p.count("n", 1)?;
                let offset = p.count("offset", 0)?;
                if offset >= n {
                    return Err(RuletraderError::validation(format!(
                        "{class}: offset should be less than n"
                    )));
                }
                StepSpec::Schedule(Schedule::RunEveryNPeriods { n, offset })
            }
            "select_all" => StepSpec::Selection(Selection::All {
                include_no_data: p.bool_or("include_no_data", false)?,
            }),
            "select_these" => {
                p.require(&["tickers"])?;
                StepSpec::Selection(Selection::These {
                    tickers: p.id_list("tickers")?,
                    include_no_data: p.bool_or("include_no_data", false)?,
                })
            }
            "select_has_data" => StepSpec::Selection(Selection::HasData {
                lookback_months: u32_or(&p, "lookback_months", 3)?,
                min_count: p.optional_count("min_count", 0)?,
                include_no_data: p.bool_or("include_no_data", false)?,
            }),
            "select_n" => {
                p.require(&["n"])?;
                StepSpec::Selection(Selection::TopN {
                    n: p.count("n", 0)?,
                    sort_descending: p.bool_or("sort_descending", true)?,
                    all_or_none: p.bool_or("all_or_none", false)?,
                })
            }
            "stat_total_return" => StepSpec::Selection(Selection::StatTotalReturn {
                lookback_months: u32_or(&p, "lookback_months", 3)?,
                lag_days: u32_or(&p, "lag_days", 0)?,
            }),
            "select_momentum" => {
                p.require(&["n"])?;
                StepSpec::Selection(Selection::Momentum {
                    n: p.count("n", 0)?,
                    lookback_months: u32_or(&p, "lookback_months", 3)?,
                    lag_days: u32_or(&p, "lag_days", 0)?,
                    sort_descending: p.bool_or("sort_descending", true)?,
                    all_or_none: p.bool_or("all_or_none", false)?,
                })
            }
            "weigh_equally" => StepSpec::Weighing(Weighing::Equally),
            "weigh_specified" | "weigh_specificed" => {
                p.require(&["weights"])?;
                StepSpec::Weighing(Weighing::Specified {
                    weights: p.weight_map("weights")?,
                })
            }
            "weigh_inverse_volatility" => StepSpec::Weighing(Weighing::InverseVolatility {
                params: descriptor.params.clone(),
            }),
            "weigh_erc" => StepSpec::Weighing(Weighing::Erc {
                params: descriptor.params.clone(),
            }),
            "weigh_mean_variance" => StepSpec::Weighing(Weighing::MeanVariance {
                params: descriptor.params.clone(),
            }),
            "weigh_randomly" => {
                let bounds = p.float_pair_or("bounds", (0.0, 1.0))?;
                if bounds.1 < bounds.0 {
                    return Err(RuletraderError::validation(format!(
                        "{class}: bounds should be (low, high)"
                    )));
                }
                StepSpec::Weighing(Weighing::Randomly {
                    bounds,
                    weight_sum: p.float_or("weight_sum", 1.0)?,
                    seed: p.optional_u64("seed")?,
                })
            }
            "weigh_target" => {
                let actions = match descriptor.params.get("action") {
                    Some(Value::Null) | None => ctx.actions.to_vec(),
                    Some(_) => parse_actions(&descriptor.params)?,
                };
                let schedule = action_merger::merge(ctx.table, &actions)?;
                StepSpec::Weighing(Weighing::Target { schedule })
            }
            "limit_deltas" => StepSpec::RiskLimit(RiskLimit::LimitDeltas {
                limit: positive(&p, "limit", 0.1)?,
            }),
            "limit_weights" => StepSpec::RiskLimit(RiskLimit::LimitWeights {
                limit: positive(&p, "limit", 0.1)?,
            }),
            "target_volatility" => {
                p.require(&["target_volatility"])?;
                StepSpec::RiskLimit(RiskLimit::TargetVolatility {
                    target_volatility: p.float("target_volatility")?,
                    params: descriptor.params.clone(),
                })
            }
            "pte_rebalance" => {
                p.require(&["PTE_volatility_cap", "target_weights"])?;
                StepSpec::RiskLimit(RiskLimit::PteRebalance {
                    pte_volatility_cap: p.float("PTE_volatility_cap")?,
                    target_weights: descriptor
                        .params
                        .get("target_weights")
                        .cloned()
                        .unwrap_or(Value::Null),
                    params: descriptor.params.clone(),
                })
            }
            "capital_flow" => {
                p.require(&["amount"])?;
                StepSpec::RiskLimit(RiskLimit::CapitalFlow {
                    amount: p.float("amount")?,
                })
            }
            "close_dead" => StepSpec::RiskLimit(RiskLimit::CloseDead),
            "rebalance" => StepSpec::Rebalance(Rebalancing::Rebalance),
            "rebalance_over_time" => StepSpec::Rebalance(Rebalancing::OverTime {
                n: p.count_or("n", 1, 10)?,
            }),
            other => {
                return Err(RuletraderError::validation(format!(
                    "no such strategy step {other}"
                )));
            }
        };
        Ok(spec)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StepSpec::Schedule(s) => match s {
                Schedule::RunOnce => "run_once",
                Schedule::RunPeriod { period, .. } => match period {
                    Period::Daily => "run_daily",
                    Period::Weekly => "run_weekly",
                    Period::Monthly => "run_monthly",
                    Period::Quarterly => "run_quarterly",
                    Period::Yearly => "run_yearly",
                },
                Schedule::RunOnDate { .. } => "run_on_date",
                Schedule::RunAfterDate { .. } => "run_after_date",
                Schedule::RunAfterDays { .. } => "run_after_days",
                Schedule::RunEveryNPeriods { .. } => "run_every_n_periods",
            },
            StepSpec::Selection(s) => match s {
                Selection::All { .. } => "select_all",
                Selection::These { .. } => "select_these",
                Selection::HasData { .. } => "select_has_data",
                Selection::TopN { .. } => "select_n",
                Selection::StatTotalReturn { .. } => "stat_total_return",
                Selection::Momentum { .. } => "select_momentum",
            },
            StepSpec::Weighing(w) => match w {
                Weighing::Equally => "weigh_equally",
                Weighing::Specified { .. } => "weigh_specified",
                Weighing::InverseVolatility { .. } => "weigh_inverse_volatility",
                Weighing::Erc { .. } => "weigh_erc",
                Weighing::MeanVariance { .. } => "weigh_mean_variance",
                Weighing::Randomly { .. } => "weigh_randomly",
                Weighing::Target { .. } => "weigh_target",
            },
            StepSpec::RiskLimit(r) => match r {
                RiskLimit::LimitDeltas { .. } => "limit_deltas",
                RiskLimit::LimitWeights { .. } => "limit_weights",
                RiskLimit::TargetVolatility { .. } => "target_volatility",
                RiskLimit::PteRebalance { .. } => "pte_rebalance",
                RiskLimit::CapitalFlow { .. } => "capital_flow",
                RiskLimit::CloseDead => "close_dead",
            },
            StepSpec::Rebalance(r) => match r {
                Rebalancing::Rebalance => "rebalance",
                Rebalancing::OverTime { .. } => "rebalance_over_time",
            },
        }
    }

    /// Portfolio-optimisation steps, carried as parameter pass-throughs.
    pub fn is_optimising(&self) -> bool {
        matches!(
            self,
            StepSpec::Weighing(
                Weighing::InverseVolatility { .. } | Weighing::Erc { .. } | Weighing::MeanVariance { .. }
            ) | StepSpec::RiskLimit(
                RiskLimit::TargetVolatility { .. } | RiskLimit::PteRebalance { .. }
            )
        )
    }

    fn sets_selection(&self) -> bool {
        matches!(
            self,
            StepSpec::Selection(
                Selection::All { .. }
                    | Selection::These { .. }
                    | Selection::HasData { .. }
                    | Selection::TopN { .. }
                    | Selection::Momentum { .. }
            )
        )
    }

    fn needs_selection(&self) -> bool {
        matches!(
            self,
            StepSpec::Selection(Selection::StatTotalReturn { .. } | Selection::Momentum { .. })
                | StepSpec::Weighing(Weighing::Equally | Weighing::Randomly { .. })
        )
    }
}

fn run_period(p: &Params<'_>, period: Period) -> Result<StepSpec, RuletraderError> {
    Ok(StepSpec::Schedule(Schedule::RunPeriod {
        period,
        run_on_first_date: p.bool_or("run_on_first_date", true)?,
        run_on_end_of_period: p.bool_or("run_on_end_of_period", false)?,
        run_on_last_date: p.bool_or("run_on_last_date", false)?,
    }))
}

fn u32_or(p: &Params<'_>, key: &str, default: u32) -> Result<u32, RuletraderError> {
    let n = p.count_or(key, 0, default as usize)?;
    u32::try_from(n).map_err(|_| RuletraderError::validation(format!("{key} is too large")))
}

fn positive(p: &Params<'_>, key: &str, default: f64) -> Result<f64, RuletraderError> {
    let v = p.float_or(key, default)?;
    if v <= 0.0 {
        return Err(RuletraderError::validation(format!("{key} should be positive")));
    }
    Ok(v)
}

fn parse_actions(params: &ParamMap) -> Result<Vec<ActionSpec>, RuletraderError> {
    let items = match params.get("action") {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(RuletraderError::validation(
                "weigh_target: action should be a list of rules",
            ));
        }
    };
    items
        .iter()
        .map(|item| {
            let wire: RuleWire = serde_json::from_value(item.clone()).map_err(|e| {
                RuletraderError::validation(format!("weigh_target: invalid rule: {e}"))
            })?;
            ActionSpec::from_wire(&wire)
        })
        .collect()
}

/// Ordered, validated step list ready for an execution engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

impl Composite {
    /// First step the bundled engine cannot execute, if any.
    pub fn first_optimising_step(&self) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.is_optimising())
    }
}

pub struct CompositionBuilder {
    name: String,
}

impl CompositionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        CompositionBuilder { name: name.into() }
    }

    pub fn build(&self, table: &DataTable, steps: Vec<StepSpec>) -> Result<Composite, RuletraderError> {
        if steps.is_empty() {
            return Err(RuletraderError::validation("strategy not in params"));
        }

        let mut selected = false;
        let mut has_stat = false;
        for step in &steps {
            if step.needs_selection() && !selected {
                return Err(RuletraderError::validation(format!(
                    "{} requires an earlier selection step",
                    step.name()
                )));
            }
            if let StepSpec::Selection(Selection::TopN { .. }) = step {
                if !has_stat {
                    return Err(RuletraderError::validation(
                        "select_n requires an earlier stat_total_return step",
                    ));
                }
            }
            if let StepSpec::Selection(Selection::These { tickers, .. }) = step {
                for t in tickers.iter().filter(|t| !table.asset_ids.contains(t)) {
                    tracing::warn!(ticker = %t, "select_these names an asset outside the data table");
                }
            }
            if matches!(step, StepSpec::Selection(Selection::StatTotalReturn { .. })) {
                has_stat = true;
            }
            selected |= step.sets_selection();
        }

        tracing::info!(
            name = %self.name,
            steps = ?steps.iter().map(StepSpec::name).collect::<Vec<_>>(),
            "assembled strategy composite"
        );

        Ok(Composite {
            name: self.name.clone(),
            steps,
        })
    }

    /// Parse descriptors in order and assemble them.
    pub fn build_from_descriptors(
        &self,
        table: &DataTable,
        descriptors: &[StepDescriptor],
        actions: &[ActionSpec],
    ) -> Result<Composite, RuletraderError> {
        let ctx = StepContext { table, actions };
        let steps = descriptors
            .iter()
            .map(|d| StepSpec::from_descriptor(d, &ctx))
            .collect::<Result<Vec<_>, _>>()?;
        self.build(table, steps)
    }
}
