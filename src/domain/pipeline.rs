//! Per-period execution of a `Composite`.
//!
//! An engine calls `Pipeline::run_period` once for every date on its clock.
//! Steps run in order and share a scratch area (selected assets, a ranking
//! statistic, target weights) that is cleared at the start of each period.
//! The first step that returns `false` ends the period's pass. Trading goes
//! through the engine's `Book`.

use chrono::{Datelike, Duration, Months, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::domain::composition::{Composite, Period, Rebalancing, RiskLimit, Schedule, Selection, StepSpec, Weighing};
use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;

/// The engine-side account a pipeline trades through.
pub trait Book {
    /// Current value share of `asset` in the portfolio; 0 if never held.
    fn weight(&self, asset: &str) -> f64;
    /// Every asset the book has ever allocated to, in first-allocation order.
    fn children(&self) -> Vec<String>;
    fn close(&mut self, asset: &str) -> Result<(), RuletraderError>;
    /// Close unlisted holdings, then move each listed asset to its target weight.
    fn rebalance(&mut self, targets: &[(String, f64)]) -> Result<(), RuletraderError>;
    /// Add (or withdraw) capital without counting it as return.
    fn adjust_capital(&mut self, amount: f64);
}

/// Where the engine's clock currently stands.
pub struct PeriodContext<'a> {
    pub row: usize,
    pub prices: &'a Frame,
}

impl<'a> PeriodContext<'a> {
    pub fn now(&self) -> NaiveDate {
        self.prices.dates[self.row]
    }

    fn is_last(&self) -> bool {
        self.row + 1 == self.prices.len()
    }

    fn price(&self, asset: &str) -> Option<f64> {
        self.prices.value(asset, self.row)
    }
}

type Weights = Vec<(String, f64)>;

#[derive(Debug, Default)]
struct Scratch {
    selected: Option<Vec<String>>,
    stat: Option<Vec<(String, Option<f64>)>>,
    weights: Option<Weights>,
}

#[derive(Debug, Clone, Default)]
struct StepState {
    fired: bool,
    remaining: usize,
    idx: usize,
    last_call: Option<NaiveDate>,
    target: Option<Weights>,
    periods_left: usize,
}

pub struct Pipeline {
    steps: Vec<StepSpec>,
    state: Vec<StepState>,
    rng: StdRng,
}

impl Pipeline {
    pub fn new(composite: &Composite) -> Self {
        let state = composite
            .steps
            .iter()
            .map(|step| match step {
                StepSpec::Schedule(Schedule::RunAfterDays { days }) => StepState {
                    remaining: *days,
                    ..StepState::default()
                },
                StepSpec::Schedule(Schedule::RunEveryNPeriods { n, offset }) => StepState {
                    idx: n - offset - 1,
                    ..StepState::default()
                },
                _ => StepState::default(),
            })
            .collect();
        let seed = composite.steps.iter().find_map(|s| match s {
            StepSpec::Weighing(Weighing::Randomly { seed, .. }) => *seed,
            _ => None,
        });
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Pipeline {
            steps: composite.steps.clone(),
            state,
            rng,
        }
    }

    /// Run every step for one period; `Ok(false)` if a step stopped the pass.
    pub fn run_period(
        &mut self,
        ctx: &PeriodContext<'_>,
        book: &mut dyn Book,
    ) -> Result<bool, RuletraderError> {
        let mut scratch = Scratch::default();
        for (step, state) in self.steps.iter().zip(self.state.iter_mut()) {
            let proceed = match step {
                StepSpec::Schedule(s) => schedule(s, state, ctx),
                StepSpec::Selection(s) => {
                    select(s, &mut scratch, ctx);
                    true
                }
                StepSpec::Weighing(w) => weigh(w, &mut scratch, ctx, &mut self.rng)?,
                StepSpec::RiskLimit(r) => limit(r, &mut scratch, ctx, book)?,
                StepSpec::Rebalance(Rebalancing::Rebalance) => {
                    if let Some(targets) = &scratch.weights {
                        book.rebalance(targets)?;
                    }
                    true
                }
                StepSpec::Rebalance(Rebalancing::OverTime { n }) => {
                    rebalance_over_time(*n, state, &mut scratch, book)?;
                    true
                }
            };
            if !proceed {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn schedule(step: &Schedule, state: &mut StepState, ctx: &PeriodContext<'_>) -> bool {
    let now = ctx.now();
    match step {
        Schedule::RunOnce => {
            if state.fired {
                false
            } else {
                state.fired = true;
                true
            }
        }
        Schedule::RunPeriod {
            period,
            run_on_first_date,
            run_on_end_of_period,
            run_on_last_date,
        } => {
            if ctx.row == 0 {
                *run_on_first_date
            } else if ctx.is_last() {
                *run_on_last_date
            } else {
                let other = if *run_on_end_of_period {
                    ctx.prices.dates[ctx.row + 1]
                } else {
                    ctx.prices.dates[ctx.row - 1]
                };
                period_changed(*period, now, other)
            }
        }
        Schedule::RunOnDate { dates } => dates.contains(&now),
        Schedule::RunAfterDate { date } => now > *date,
        Schedule::RunAfterDays { .. } => {
            if state.remaining > 0 {
                state.remaining -= 1;
                false
            } else {
                true
            }
        }
        Schedule::RunEveryNPeriods { n, .. } => {
            if state.last_call == Some(now) {
                return false;
            }
            state.last_call = Some(now);
            if state.idx == n - 1 {
                state.idx = 0;
                true
            } else {
                state.idx += 1;
                false
            }
        }
    }
}

fn period_changed(period: Period, a: NaiveDate, b: NaiveDate) -> bool {
    match period {
        Period::Daily => a != b,
        Period::Weekly => a.iso_week() != b.iso_week(),
        Period::Monthly => a.year() != b.year() || a.month() != b.month(),
        Period::Quarterly => a.year() != b.year() || a.month0() / 3 != b.month0() / 3,
        Period::Yearly => a.year() != b.year(),
    }
}

fn positive_now(ctx: &PeriodContext<'_>, names: impl Iterator<Item = String>) -> Vec<String> {
    names
        .filter(|name| ctx.price(name).is_some_and(|p| p.is_finite() && p > 0.0))
        .collect()
}

fn select(step: &Selection, scratch: &mut Scratch, ctx: &PeriodContext<'_>) {
    match step {
        Selection::All { include_no_data } => {
            let names = ctx.prices.column_names().into_iter();
            scratch.selected = Some(if *include_no_data {
                names.collect()
            } else {
                positive_now(ctx, names)
            });
        }
        Selection::These {
            tickers,
            include_no_data,
        } => {
            let known = tickers.iter().filter(|t| ctx.prices.has_column(t)).cloned();
            scratch.selected = Some(if *include_no_data {
                tickers.clone()
            } else {
                positive_now(ctx, known)
            });
        }
        Selection::HasData {
            lookback_months,
            min_count,
            include_no_data,
        } => {
            let candidates = scratch
                .selected
                .take()
                .unwrap_or_else(|| ctx.prices.column_names());
            let required = min_count.unwrap_or_else(|| default_min_count(*lookback_months));
            let start = ctx
                .now()
                .checked_sub_months(Months::new(*lookback_months))
                .unwrap_or(NaiveDate::MIN);
            let lo = ctx.prices.first_index_on_or_after(start);
            let window = lo..=ctx.row;
            let with_data = candidates.into_iter().filter(|name| {
                ctx.prices.column(name).is_some_and(|c| {
                    c.values[window.clone()].iter().filter(|v| v.is_finite()).count() >= required
                })
            });
            scratch.selected = Some(if *include_no_data {
                with_data.collect()
            } else {
                positive_now(ctx, with_data)
            });
        }
        Selection::StatTotalReturn {
            lookback_months,
            lag_days,
        } => {
            scratch.stat = Some(total_return(ctx, scratch, *lookback_months, *lag_days));
        }
        Selection::TopN {
            n,
            sort_descending,
            all_or_none,
        } => {
            let stat = scratch.stat.clone().unwrap_or_default();
            scratch.selected = Some(top_n(stat, *n, *sort_descending, *all_or_none));
        }
        Selection::Momentum {
            n,
            lookback_months,
            lag_days,
            sort_descending,
            all_or_none,
        } => {
            let stat = total_return(ctx, scratch, *lookback_months, *lag_days);
            scratch.selected = Some(top_n(stat.clone(), *n, *sort_descending, *all_or_none));
            scratch.stat = Some(stat);
        }
    }
}

/// Minimum observation count for a lookback, assuming roughly 69% of
/// calendar days trade and requiring 90% of those.
fn default_min_count(lookback_months: u32) -> usize {
    let anchor = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or(NaiveDate::MIN);
    let start = anchor
        .checked_sub_months(Months::new(lookback_months))
        .unwrap_or(anchor);
    let days = (anchor - start).num_days() as f64;
    (days * 0.69 * 0.9).ceil() as usize
}

fn total_return(
    ctx: &PeriodContext<'_>,
    scratch: &Scratch,
    lookback_months: u32,
    lag_days: u32,
) -> Vec<(String, Option<f64>)> {
    let end = ctx.now() - Duration::days(i64::from(lag_days));
    let start = end
        .checked_sub_months(Months::new(lookback_months))
        .unwrap_or(NaiveDate::MIN);
    let lo = ctx.prices.first_index_on_or_after(start);
    let hi = ctx.prices.dates[..=ctx.row].partition_point(|d| *d <= end);
    scratch
        .selected
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|name| {
            let ret = ctx.prices.column(&name).and_then(|c| {
                if hi <= lo {
                    return None;
                }
                let first = c.values[lo];
                let last = c.values[hi - 1];
                Some(last / first - 1.0).filter(|r| r.is_finite())
            });
            (name, ret)
        })
        .collect()
}

fn top_n(
    stat: Vec<(String, Option<f64>)>,
    n: usize,
    sort_descending: bool,
    all_or_none: bool,
) -> Vec<String> {
    let mut ranked: Vec<(String, f64)> = stat
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
        .collect();
    ranked.sort_by(|a, b| {
        let ord = a.1.total_cmp(&b.1);
        if sort_descending { ord.reverse() } else { ord }
    });
    let selected: Vec<String> = ranked.into_iter().take(n).map(|(name, _)| name).collect();
    if all_or_none && selected.len() < n {
        Vec::new()
    } else {
        selected
    }
}

fn weigh(
    step: &Weighing,
    scratch: &mut Scratch,
    ctx: &PeriodContext<'_>,
    rng: &mut StdRng,
) -> Result<bool, RuletraderError> {
    match step {
        Weighing::Equally => {
            let selected = scratch.selected.clone().unwrap_or_default();
            let w = 1.0 / selected.len() as f64;
            scratch.weights = Some(selected.into_iter().map(|name| (name, w)).collect());
            Ok(true)
        }
        Weighing::Specified { weights } => {
            scratch.weights = Some(weights.iter().map(|(k, v)| (k.clone(), *v)).collect());
            Ok(true)
        }
        Weighing::Randomly {
            bounds, weight_sum, ..
        } => {
            let selected = scratch.selected.clone().unwrap_or_default();
            let weights = random_weights(rng, selected.len(), *bounds, *weight_sum)
                .map(|w| selected.into_iter().zip(w).collect())
                .unwrap_or_default();
            scratch.weights = Some(weights);
            Ok(true)
        }
        Weighing::Target { schedule } => match schedule.index_of(ctx.now()) {
            Some(row) => {
                scratch.weights = Some(
                    schedule
                        .row(row)
                        .into_iter()
                        .filter(|(_, v)| v.is_finite())
                        .map(|(name, v)| (name.to_string(), v))
                        .collect(),
                );
                Ok(true)
            }
            None => Ok(false),
        },
        Weighing::InverseVolatility { .. } | Weighing::Erc { .. } | Weighing::MeanVariance { .. } => {
            Err(RuletraderError::UnsupportedStep {
                step: StepSpec::Weighing(step.clone()).name().to_string(),
            })
        }
    }
}

/// Uniform random weights within `bounds` summing to `total`; `None` when
/// no such split exists.
fn random_weights(rng: &mut StdRng, n: usize, bounds: (f64, f64), total: f64) -> Option<Vec<f64>> {
    let (low, high) = bounds;
    if n == 0 || (n as f64) * high < total || (n as f64) * low > total {
        return None;
    }
    let mut weights = Vec::with_capacity(n);
    let mut remaining = -total;
    for i in 0..n {
        let rest = (n - i - 1) as f64;
        let lower = (-rest * high - remaining).max(low);
        let upper = (-rest * low - remaining).min(high);
        let w = if upper > lower {
            rng.gen_range(lower..=upper)
        } else {
            lower
        };
        weights.push(w);
        remaining += w;
    }
    weights.shuffle(rng);
    Some(weights)
}

fn limit(
    step: &RiskLimit,
    scratch: &mut Scratch,
    ctx: &PeriodContext<'_>,
    book: &mut dyn Book,
) -> Result<bool, RuletraderError> {
    match step {
        RiskLimit::LimitDeltas { limit } => {
            if let Some(weights) = scratch.weights.as_mut() {
                let mut keys: Vec<String> = book.children();
                for (name, _) in weights.iter() {
                    if !keys.contains(name) {
                        keys.push(name.clone());
                    }
                }
                for key in keys {
                    let current = book.weight(&key);
                    let pos = weights.iter().position(|(n, _)| *n == key);
                    let target = pos.map_or(0.0, |i| weights[i].1);
                    let delta = target - current;
                    if delta.abs() > *limit {
                        let capped = current + limit * delta.signum();
                        match pos {
                            Some(i) => weights[i].1 = capped,
                            None => weights.push((key, capped)),
                        }
                    }
                }
            }
            Ok(true)
        }
        RiskLimit::LimitWeights { limit } => {
            if let Some(weights) = scratch.weights.take() {
                let limited = if weights.is_empty() {
                    weights
                } else if *limit < 1.0 / weights.len() as f64 {
                    Vec::new()
                } else {
                    limit_weights(weights, *limit)?
                };
                scratch.weights = Some(limited);
            }
            Ok(true)
        }
        RiskLimit::CapitalFlow { amount } => {
            book.adjust_capital(*amount);
            Ok(true)
        }
        RiskLimit::CloseDead => {
            if scratch.weights.is_none() {
                return Ok(true);
            }
            for child in book.children() {
                if ctx.price(&child).is_none_or(|p| p <= 0.0) {
                    book.close(&child)?;
                    if let Some(weights) = scratch.weights.as_mut() {
                        weights.retain(|(name, _)| *name != child);
                    }
                }
            }
            Ok(true)
        }
        RiskLimit::TargetVolatility { .. } | RiskLimit::PteRebalance { .. } => {
            Err(RuletraderError::UnsupportedStep {
                step: StepSpec::RiskLimit(step.clone()).name().to_string(),
            })
        }
    }
}

const MAX_LIMIT_PASSES: usize = 100;

/// Cap each weight at `limit`, handing the excess to the uncapped weights
/// in proportion to their size.
fn limit_weights(weights: Weights, limit: f64) -> Result<Weights, RuletraderError> {
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum * 10.0).round() / 10.0 != 1.0 {
        return Err(RuletraderError::validation(format!(
            "limit_weights: expecting weights that sum to 1, sum is {sum}"
        )));
    }
    let mut res: Weights = weights
        .into_iter()
        .map(|(name, w)| (name, (w * 1e4).round() / 1e4))
        .collect();
    for _ in 0..MAX_LIMIT_PASSES {
        let excess: f64 = res.iter().filter(|(_, w)| *w > limit).map(|(_, w)| w - limit).sum();
        let under: f64 = res.iter().filter(|(_, w)| *w < limit).map(|(_, w)| w).sum();
        for (_, w) in res.iter_mut() {
            if *w > limit {
                *w = limit;
            } else if *w < limit && under > 0.0 {
                *w += *w / under * excess;
            }
        }
        if !res.iter().any(|(_, w)| *w > limit + 1e-12) {
            break;
        }
    }
    Ok(res)
}

fn rebalance_over_time(
    n: usize,
    state: &mut StepState,
    scratch: &mut Scratch,
    book: &mut dyn Book,
) -> Result<(), RuletraderError> {
    if let Some(weights) = scratch.weights.take() {
        state.target = Some(weights);
        state.periods_left = n;
    }
    let Some(target) = state.target.clone() else {
        return Ok(());
    };
    if target.is_empty() {
        state.target = None;
        return Ok(());
    }
    let left = state.periods_left as f64;
    let step: Weights = target
        .iter()
        .map(|(name, w)| {
            let current = book.weight(name);
            (name.clone(), current + (w - current) / left)
        })
        .collect();
    book.rebalance(&step)?;
    scratch.weights = Some(step);
    state.periods_left -= 1;
    if state.periods_left == 0 {
        state.target = None;
    }
    Ok(())
}
