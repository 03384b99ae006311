//! Rule evaluation: turns a rule into the dates on which it triggers.
//!
//! # Evaluation Semantics
//!
//! - Threshold, growth and cumulative-return rules read the indicator shifted
//!   forward one period, so a trigger on date `t` only uses data up to `t-1`
//! - Moving-average crossovers read the raw indicator
//! - Rolling windows require a full window; a missing value compares false
//! - The first period of any computed series never triggers
//! - Fixed-date rules return exactly the supplied dates

use chrono::NaiveDate;

use crate::domain::data_table::DataTable;
use crate::domain::error::RuletraderError;
use crate::domain::rule::{Direction, RuleKind, RuleSpec};
use crate::domain::series;

/// Trigger dates of `rule` against its indicator column in `table`.
pub fn evaluate(table: &DataTable, rule: &RuleSpec) -> Result<Vec<NaiveDate>, RuletraderError> {
    let values = table.indicator_values(&rule.indicator_id)?;
    let dates = evaluate_series(table.dates(), values, rule)?;
    tracing::debug!(
        rule = %rule,
        triggers = dates.len(),
        "evaluated rule"
    );
    Ok(dates)
}

/// Trigger dates of `rule` over a bare `(dates, values)` series.
pub fn evaluate_series(
    dates: &[NaiveDate],
    values: &[f64],
    rule: &RuleSpec,
) -> Result<Vec<NaiveDate>, RuletraderError> {
    if dates.len() != values.len() {
        return Err(RuletraderError::validation(format!(
            "indicator ID {} has {} values for {} dates",
            rule.indicator_id,
            values.len(),
            dates.len()
        )));
    }

    let raw: Vec<Option<f64>> = values.iter().map(|v| Some(*v).filter(|x| x.is_finite())).collect();
    let long = rule.direction == Direction::Long;

    let hits = match &rule.kind {
        RuleKind::FixedDates { dates: fixed } => return Ok(fixed.clone()),
        RuleKind::ThresholdBreach { threshold, n } => {
            let th = *threshold;
            let shifted = series::shift(&raw, 1);
            if long {
                let rmin = series::rolling_min(&shifted, *n);
                series::edges(&rmin, |v| v >= th, |v| v < th)
            } else {
                let rmax = series::rolling_max(&shifted, *n);
                series::edges(&rmax, |v| v <= th, |v| v > th)
            }
        }
        RuleKind::ContinuousGrowth { n } => {
            let growth = series::diff(&series::shift(&raw, 1));
            if long {
                let gmin = series::rolling_min(&growth, *n);
                series::edges(&gmin, |v| v >= 0.0, |v| v < 0.0)
            } else {
                let gmax = series::rolling_max(&growth, *n);
                series::edges(&gmax, |v| v < 0.0, |v| v >= 0.0)
            }
        }
        RuleKind::CumulativeReturnBreach { threshold, n } => {
            let th = *threshold;
            let returns = series::pct_change(&series::shift(&raw, 1), *n);
            if long {
                series::edges(&returns, |v| v >= th, |v| v < th)
            } else {
                series::edges(&returns, |v| v < th, |v| v >= th)
            }
        }
        RuleKind::MaCrossoverMa { ma1, ma2 } => {
            let fast = series::rolling_mean(&raw, *ma1);
            let slow = series::rolling_mean(&raw, *ma2);
            crossings(&fast, &slow, long)
        }
        RuleKind::MaCrossoverPrice { ma } => {
            let mean = series::rolling_mean(&raw, *ma);
            crossings(&raw, &mean, long)
        }
    };

    Ok(hits.into_iter().map(|i| dates[i]).collect())
}

/// Indices where `left` moves into being above (`long`) or below `right`.
///
/// A period with either side missing is "not in state", so the first fully
/// populated period may itself be a crossing.
fn crossings(left: &[Option<f64>], right: &[Option<f64>], long: bool) -> Vec<usize> {
    let state: Vec<bool> = left
        .iter()
        .zip(right)
        .map(|pair| match pair {
            (Some(l), Some(r)) if long => l > r,
            (Some(l), Some(r)) => l < r,
            _ => false,
        })
        .collect();
    (1..state.len())
        .filter(|&i| state[i] && !state[i - 1])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::data_table::SeriesInput;
    use crate::domain::frequency::Frequency;
    use chrono::Duration;

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i as i64)
    }

    fn dates(n: usize) -> Vec<NaiveDate> {
        (0..n).map(day).collect()
    }

    fn rule(kind: RuleKind, direction: Direction) -> RuleSpec {
        RuleSpec {
            kind,
            indicator_id: "I".into(),
            direction,
        }
    }

    #[test]
    fn threshold_breach_long_uses_previous_period() {
        let values = [1.0, 1.0, 3.0, 3.0, 3.0, 1.0];
        let r = rule(
            RuleKind::ThresholdBreach {
                threshold: 2.0,
                n: 2,
            },
            Direction::Long,
        );
        // shifted: _,1,1,3,3,3 ; rolling min(2): _,_,1,1,3,3
        let hits = evaluate_series(&dates(6), &values, &r).unwrap();
        assert_eq!(hits, vec![day(4)]);
    }

    #[test]
    fn threshold_breach_long_on_rising_series_fires_once() {
        let values: Vec<f64> = (0..20).map(f64::from).collect();
        let r = rule(
            RuleKind::ThresholdBreach {
                threshold: 7.5,
                n: 3,
            },
            Direction::Long,
        );
        // window min at i is v[i-3]; v[8] is the first value above 7.5
        let hits = evaluate_series(&dates(20), &values, &r).unwrap();
        assert_eq!(hits, vec![day(11)]);
    }

    #[test]
    fn threshold_breach_short_uses_rolling_max() {
        let values = [5.0, 5.0, 1.0, 1.0, 1.0];
        let r = rule(
            RuleKind::ThresholdBreach {
                threshold: 2.0,
                n: 2,
            },
            Direction::Short,
        );
        // shifted: _,5,5,1,1 ; rolling max(2): _,_,5,5,1
        let hits = evaluate_series(&dates(5), &values, &r).unwrap();
        assert_eq!(hits, vec![day(4)]);
    }

    #[test]
    fn continuous_growth_both_directions() {
        let values = [5.0, 4.0, 3.0, 4.0, 5.0, 6.0, 5.0, 4.0];
        let up = rule(RuleKind::ContinuousGrowth { n: 2 }, Direction::Long);
        // shifted diff: _,_,-1,-1,1,1,1,-1 ; rolling min(2): _,_,_,-1,-1,1,1,-1
        assert_eq!(evaluate_series(&dates(8), &values, &up).unwrap(), vec![day(5)]);

        let down = rule(RuleKind::ContinuousGrowth { n: 1 }, Direction::Short);
        // rolling max(1) == diff; first negative after non-negative is index 7
        assert_eq!(evaluate_series(&dates(8), &values, &down).unwrap(), vec![day(7)]);
    }

    #[test]
    fn cumulative_return_breach() {
        let values = [100.0, 100.0, 100.0, 120.0, 120.0, 90.0, 90.0];
        let up = rule(
            RuleKind::CumulativeReturnBreach {
                threshold: 0.1,
                n: 1,
            },
            Direction::Long,
        );
        // shifted pct(1): _,_,0,0,0.2,0,-0.25
        assert_eq!(evaluate_series(&dates(7), &values, &up).unwrap(), vec![day(4)]);

        let down = rule(
            RuleKind::CumulativeReturnBreach {
                threshold: 0.1,
                n: 1,
            },
            Direction::Short,
        );
        assert_eq!(evaluate_series(&dates(7), &values, &down).unwrap(), vec![day(5)]);
    }

    #[test]
    fn ma_crossover_price_fires_on_flip() {
        let values = [3.0, 2.0, 1.0, 4.0, 5.0, 1.0, 6.0];
        let r = rule(RuleKind::MaCrossoverPrice { ma: 2 }, Direction::Long);
        // mean(2): _,2.5,1.5,2.5,4.5,3,3.5 ; above: F,F,F,T,T,F,T
        assert_eq!(
            evaluate_series(&dates(7), &values, &r).unwrap(),
            vec![day(3), day(6)]
        );
    }

    #[test]
    fn ma_crossover_ma_short() {
        let values = [1.0, 2.0, 3.0, 4.0, 3.0, 1.0, 0.5];
        let r = rule(RuleKind::MaCrossoverMa { ma1: 1, ma2: 3 }, Direction::Short);
        // ma3: _,_,2,3,3.33,2.67,1.5 ; below: F,F,F,F,T,T,T
        assert_eq!(evaluate_series(&dates(7), &values, &r).unwrap(), vec![day(4)]);
    }

    #[test]
    fn fixed_dates_returned_verbatim() {
        let fixed = vec![day(3), day(0)];
        let r = rule(
            RuleKind::FixedDates {
                dates: fixed.clone(),
            },
            Direction::Short,
        );
        assert_eq!(evaluate_series(&dates(5), &[1.0; 5], &r).unwrap(), fixed);
    }

    #[test]
    fn unknown_indicator_fails() {
        let asset = SeriesInput::new(
            "A",
            Frequency::Daily,
            (0..5).map(|i| (day(i), 1.0 + i as f64)).collect(),
        );
        let table = DataTable::build(vec![asset], vec![]).unwrap();
        let r = rule(RuleKind::ContinuousGrowth { n: 1 }, Direction::Long);
        let err = evaluate(&table, &r).unwrap_err();
        assert!(err.to_string().contains("indicator ID I not in Data Table"));
    }

    #[test]
    fn evaluate_reads_table_column() {
        let asset = SeriesInput::new("A", Frequency::Daily, (0..6).map(|i| (day(i), 1.0)).collect());
        let ind = SeriesInput::new(
            "I",
            Frequency::Daily,
            vec![1.0, 1.0, 3.0, 3.0, 3.0, 1.0]
                .into_iter()
                .enumerate()
                .map(|(i, v)| (day(i), v))
                .collect(),
        );
        let table = DataTable::build(vec![asset], vec![ind]).unwrap();
        let r = rule(
            RuleKind::ThresholdBreach {
                threshold: 2.0,
                n: 2,
            },
            Direction::Long,
        );
        assert_eq!(evaluate(&table, &r).unwrap(), vec![day(4)]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn first_period_never_triggers(
                values in proptest::collection::vec(-50.0f64..50.0, 2..40),
                n in 1usize..5,
                threshold in -10.0f64..10.0,
                long in any::<bool>(),
            ) {
                let direction = if long { Direction::Long } else { Direction::Short };
                let kinds = [
                    RuleKind::ThresholdBreach { threshold, n },
                    RuleKind::ContinuousGrowth { n },
                    RuleKind::CumulativeReturnBreach { threshold, n },
                    RuleKind::MaCrossoverMa { ma1: n, ma2: n + 1 },
                    RuleKind::MaCrossoverPrice { ma: n },
                ];
                let ds = dates(values.len());
                for kind in kinds {
                    let hits = evaluate_series(&ds, &values, &rule(kind, direction)).unwrap();
                    prop_assert!(!hits.contains(&ds[0]));
                }
            }

            #[test]
            fn threshold_breach_long_on_rising_series_fires_at_first_crossing(
                start in -20.0f64..20.0,
                steps in proptest::collection::vec(0.1f64..5.0, 1..40),
                n in 1usize..5,
                above_start in 0.01f64..60.0,
            ) {
                let mut values = vec![start];
                for step in &steps {
                    let last = values[values.len() - 1];
                    values.push(last + step);
                }
                let threshold = start + above_start;
                let ds = dates(values.len());
                let r = rule(RuleKind::ThresholdBreach { threshold, n }, Direction::Long);
                let hits = evaluate_series(&ds, &values, &r).unwrap();

                let expected: Vec<NaiveDate> = values
                    .iter()
                    .position(|&v| v >= threshold)
                    .map(|k| k + n)
                    .filter(|&i| i < values.len())
                    .map(|i| ds[i])
                    .into_iter()
                    .collect();
                prop_assert_eq!(hits, expected);
            }
        }
    }
}
