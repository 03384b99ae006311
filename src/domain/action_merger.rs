//! Merges per-rule trigger dates into one target-weight schedule per asset.
//!
//! Each action writes its side's exposure (+1 buy, -1 sell, 0 hold) into the
//! asset's column from its trigger date onward. Actions are applied in
//! date order with ties kept in input order, so a later action overwrites
//! an earlier one from its own date forward.

use chrono::NaiveDate;

use crate::domain::data_table::DataTable;
use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;
use crate::domain::params::coerce_id;
use crate::domain::rule::{RuleSpec, RuleWire, Side};
use crate::domain::rule_eval;

/// Target exposure per asset, one row per table date.
pub type WeightSchedule = Frame;

/// A rule bound to the asset it trades.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    pub side: Side,
    pub asset_id: String,
    pub rule: RuleSpec,
}

impl ActionSpec {
    pub fn from_wire(wire: &RuleWire) -> Result<Self, RuletraderError> {
        let side = wire.side.parse::<Side>()?;
        let asset_id = coerce_id(&wire.asset_id)?;
        let rule = RuleSpec::parse(&wire.rule_kind, &wire.indicator_id, &wire.params)?;
        Ok(ActionSpec {
            side,
            asset_id,
            rule,
        })
    }
}

/// One triggered action.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub side: Side,
    pub asset_id: String,
    pub trigger_date: NaiveDate,
}

/// Evaluate every action's rule and return the triggers in application order.
pub fn signals(table: &DataTable, actions: &[ActionSpec]) -> Result<Vec<Action>, RuletraderError> {
    let mut out = Vec::new();
    for spec in actions {
        for trigger_date in rule_eval::evaluate(table, &spec.rule)? {
            out.push(Action {
                side: spec.side,
                asset_id: spec.asset_id.clone(),
                trigger_date,
            });
        }
    }
    // stable: same-date actions keep input order
    out.sort_by_key(|a| a.trigger_date);
    Ok(out)
}

pub fn merge(table: &DataTable, actions: &[ActionSpec]) -> Result<WeightSchedule, RuletraderError> {
    let triggered = signals(table, actions)?;
    let rows = table.dates().len();

    let mut columns: Vec<(String, Vec<Option<f64>>)> = table
        .asset_ids
        .iter()
        .map(|id| (id.clone(), vec![None; rows]))
        .collect();

    for action in &triggered {
        let col = match columns.iter().position(|(name, _)| *name == action.asset_id) {
            Some(i) => i,
            None => {
                tracing::warn!(
                    asset = %action.asset_id,
                    "action names an asset outside the data table; adding an empty column"
                );
                columns.push((action.asset_id.clone(), vec![None; rows]));
                columns.len() - 1
            }
        };
        let start = table.asset.first_index_on_or_after(action.trigger_date);
        let weight = action.side.weight();
        for cell in &mut columns[col].1[start..] {
            *cell = Some(weight);
        }
    }

    tracing::debug!(
        actions = actions.len(),
        triggers = triggered.len(),
        "merged actions into weight schedule"
    );

    Frame::from_columns(
        table.dates().to_vec(),
        columns
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().map(|v| v.unwrap_or(0.0)).collect()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::data_table::SeriesInput;
    use crate::domain::frequency::Frequency;
    use crate::domain::rule::{Direction, RuleKind};
    use chrono::Duration;
    use serde_json::json;

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(i as i64)
    }

    fn table(assets: &[&str], rows: usize) -> DataTable {
        let inputs = assets
            .iter()
            .map(|name| {
                SeriesInput::new(
                    *name,
                    Frequency::Daily,
                    (0..rows).map(|i| (day(i), 10.0 + i as f64)).collect(),
                )
            })
            .collect();
        let indicator = SeriesInput::new(
            "I",
            Frequency::Daily,
            (0..rows).map(|i| (day(i), 1.0)).collect(),
        );
        DataTable::build(inputs, vec![indicator]).unwrap()
    }

    fn on(side: Side, asset: &str, dates: Vec<NaiveDate>) -> ActionSpec {
        ActionSpec {
            side,
            asset_id: asset.into(),
            rule: RuleSpec {
                kind: RuleKind::FixedDates { dates },
                indicator_id: "I".into(),
                direction: Direction::Long,
            },
        }
    }

    #[test]
    fn buy_then_sell_forward_fills() {
        let t = table(&["A"], 5);
        let schedule = merge(
            &t,
            &[on(Side::Buy, "A", vec![day(1)]), on(Side::Sell, "A", vec![day(3)])],
        )
        .unwrap();
        assert_eq!(schedule.columns[0].values, vec![0.0, 1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn application_follows_date_order_not_input_order() {
        let t = table(&["A"], 5);
        let schedule = merge(
            &t,
            &[on(Side::Sell, "A", vec![day(3)]), on(Side::Buy, "A", vec![day(1)])],
        )
        .unwrap();
        assert_eq!(schedule.columns[0].values, vec![0.0, 1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn same_date_keeps_input_order() {
        let t = table(&["A"], 3);
        let schedule = merge(
            &t,
            &[on(Side::Buy, "A", vec![day(1)]), on(Side::Hold, "A", vec![day(1)])],
        )
        .unwrap();
        assert_eq!(schedule.columns[0].values, vec![0.0, 0.0, 0.0]);

        let schedule = merge(
            &t,
            &[on(Side::Hold, "A", vec![day(1)]), on(Side::Buy, "A", vec![day(1)])],
        )
        .unwrap();
        assert_eq!(schedule.columns[0].values, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn assets_do_not_interact() {
        let t = table(&["A", "B"], 4);
        let schedule = merge(
            &t,
            &[on(Side::Buy, "A", vec![day(2)]), on(Side::Sell, "B", vec![day(1)])],
        )
        .unwrap();
        assert_eq!(schedule.column("A").unwrap().values, vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(schedule.column("B").unwrap().values, vec![0.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn trigger_between_dates_applies_from_next_row() {
        let t = table(&["A"], 3);
        let later = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let schedule = merge(&t, &[on(Side::Buy, "A", vec![later])]).unwrap();
        assert_eq!(schedule.columns[0].values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn unknown_asset_adds_column() {
        let t = table(&["A"], 3);
        let schedule = merge(&t, &[on(Side::Buy, "Z", vec![day(2)])]).unwrap();
        assert_eq!(schedule.column_names(), vec!["A", "Z"]);
        assert_eq!(schedule.column("Z").unwrap().values, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn from_wire_validates_side() {
        let wire: RuleWire = serde_json::from_value(json!({
            "rule_kind": "continuous_growth",
            "indicator_id": "I",
            "asset_id": "A",
            "side": "short",
            "params": {"n": 2, "sign": 1}
        }))
        .unwrap();
        let err = ActionSpec::from_wire(&wire).unwrap_err();
        assert!(err.to_string().contains("no such strategy"));
    }

    #[test]
    fn from_wire_builds_spec() {
        let wire: RuleWire = serde_json::from_value(json!({
            "rule_kind": "continuous_growth",
            "indicator_id": 3,
            "asset_id": 2330,
            "side": "sell",
            "params": {"n": 2, "sign": -1}
        }))
        .unwrap();
        let spec = ActionSpec::from_wire(&wire).unwrap();
        assert_eq!(spec.side, Side::Sell);
        assert_eq!(spec.asset_id, "2330");
        assert_eq!(spec.rule.direction, Direction::Short);
    }
}
