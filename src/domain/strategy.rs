//! Strategy definitions and the builder that edits them.
//!
//! A `StrategyDefinition` is the JSON document a backtest runs from: the
//! traded assets, their rules and the pipeline steps. When no steps are
//! given the default pipeline `[run_<freq>, select_all, weigh_target,
//! rebalance]` applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::action_merger::ActionSpec;
use crate::domain::composition::{StepDescriptor, STEP_CLASSES};
use crate::domain::error::RuletraderError;
use crate::domain::frequency::Frequency;
use crate::domain::params::coerce_id;
use crate::domain::rule::{RuleSpec, RuleWire, Side};

fn default_frequency() -> Frequency {
    Frequency::Daily
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    #[serde(default)]
    pub assets: Vec<String>,
    /// Indicator series to load besides the assets themselves.
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleWire>,
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
}

/// `[run_<freq>, select_all, weigh_target, rebalance]`
pub fn default_steps(frequency: Frequency) -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::new(frequency.schedule_step()),
        StepDescriptor::new("select_all"),
        StepDescriptor::new("weigh_target"),
        StepDescriptor::new("rebalance"),
    ]
}

impl StrategyDefinition {
    pub fn from_json(json: &str) -> Result<Self, RuletraderError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, RuletraderError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Declared steps, or the default pipeline when none are declared.
    pub fn pipeline(&self) -> Vec<StepDescriptor> {
        if self.steps.is_empty() {
            default_steps(self.frequency)
        } else {
            self.steps.clone()
        }
    }

    /// Parsed rules, with a missing asset resolved to the sole asset.
    pub fn actions(&self) -> Result<Vec<ActionSpec>, RuletraderError> {
        self.rules
            .iter()
            .map(|wire| ActionSpec::from_wire(&resolve_asset(wire, &self.assets)))
            .collect()
    }

    /// Extra indicators plus every indicator a rule reads, without duplicates.
    pub fn indicator_ids(&self) -> Result<Vec<String>, RuletraderError> {
        let mut ids = self.indicators.clone();
        for wire in &self.rules {
            let id = coerce_id(&wire.indicator_id)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Structural checks that need no market data.
    ///
    /// A rule without an asset passes; it is resolved against the asset
    /// list when the strategy runs.
    pub fn validate(&self) -> Result<(), RuletraderError> {
        if self.name.trim().is_empty() {
            return Err(RuletraderError::validation("name not in params"));
        }
        for wire in &self.rules {
            wire.side.parse::<Side>()?;
            RuleSpec::parse(&wire.rule_kind, &wire.indicator_id, &wire.params)?;
            if !wire.asset_id.is_null() {
                coerce_id(&wire.asset_id)?;
            }
        }
        for step in &self.steps {
            if !STEP_CLASSES.contains(&step.class.as_str()) {
                return Err(RuletraderError::validation(format!(
                    "no such strategy step {}",
                    step.class
                )));
            }
        }
        Ok(())
    }
}

fn resolve_asset(wire: &RuleWire, assets: &[String]) -> RuleWire {
    match (&wire.asset_id, assets) {
        (Value::Null, [sole]) => RuleWire {
            asset_id: Value::String(sole.clone()),
            ..wire.clone()
        },
        _ => wire.clone(),
    }
}

/// Incremental editor for a `StrategyDefinition`'s rule list.
#[derive(Debug, Clone)]
pub struct StrategyBuilder {
    definition: StrategyDefinition,
}

impl StrategyBuilder {
    pub fn new(
        name: impl Into<String>,
        frequency: Frequency,
        assets: Vec<String>,
    ) -> Result<Self, RuletraderError> {
        if assets.is_empty() {
            return Err(RuletraderError::validation("asset not in params"));
        }
        Ok(StrategyBuilder {
            definition: StrategyDefinition {
                name: name.into(),
                frequency,
                assets,
                indicators: Vec::new(),
                rules: Vec::new(),
                steps: default_steps(frequency),
            },
        })
    }

    pub fn from_definition(definition: StrategyDefinition) -> Self {
        StrategyBuilder { definition }
    }

    fn check(&mut self, rule: RuleWire) -> Result<RuleWire, RuletraderError> {
        let rule = resolve_asset(&rule, &self.definition.assets);
        let action = ActionSpec::from_wire(&rule)?;
        let id = &action.rule.indicator_id;
        if !self.definition.assets.contains(id) && !self.definition.indicators.contains(id) {
            tracing::debug!(indicator = %id, "registered indicator");
            self.definition.indicators.push(id.clone());
        }
        Ok(rule)
    }

    fn check_index(&self, index: usize) -> Result<(), RuletraderError> {
        if index >= self.definition.rules.len() {
            return Err(RuletraderError::validation(format!(
                "no rule at index {index} ({} rules)",
                self.definition.rules.len()
            )));
        }
        Ok(())
    }

    pub fn add_action(&mut self, rule: RuleWire) -> Result<&mut Self, RuletraderError> {
        let rule = self.check(rule)?;
        self.definition.rules.push(rule);
        Ok(self)
    }

    pub fn delete_action(&mut self, index: usize) -> Result<RuleWire, RuletraderError> {
        self.check_index(index)?;
        Ok(self.definition.rules.remove(index))
    }

    /// Swap the rule at `index`, returning the one it replaced.
    pub fn replace_action(
        &mut self,
        index: usize,
        rule: RuleWire,
    ) -> Result<RuleWire, RuletraderError> {
        self.check_index(index)?;
        let rule = self.check(rule)?;
        Ok(std::mem::replace(&mut self.definition.rules[index], rule))
    }

    pub fn with_steps(&mut self, steps: Vec<StepDescriptor>) -> &mut Self {
        self.definition.steps = steps;
        self
    }

    pub fn actions(&self) -> &[RuleWire] {
        &self.definition.rules
    }

    pub fn definition(&self) -> &StrategyDefinition {
        &self.definition
    }

    pub fn build(self) -> StrategyDefinition {
        self.definition
    }

    pub fn to_json(&self) -> Result<String, RuletraderError> {
        self.definition.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: Value) -> RuleWire {
        serde_json::from_value(value).unwrap()
    }

    fn buy() -> RuleWire {
        rule(json!({
            "rule_kind": "threshold_breach",
            "indicator_id": 3,
            "side": "buy",
            "params": {"threshold": 1.0, "n": 2, "sign": 1}
        }))
    }

    fn sell() -> RuleWire {
        rule(json!({
            "method": "ma_crossover_price",
            "indicator_id": "2330",
            "strategy": "sell",
            "params": {"ma": 5, "sign": -1}
        }))
    }

    #[test]
    fn default_pipeline_follows_frequency() {
        let b = StrategyBuilder::new("s", Frequency::Monthly, vec!["2330".into()]).unwrap();
        let classes: Vec<&str> = b.definition().steps.iter().map(|s| s.class.as_str()).collect();
        assert_eq!(classes, vec!["run_monthly", "select_all", "weigh_target", "rebalance"]);
    }

    #[test]
    fn sole_asset_is_the_default_target() {
        let mut b = StrategyBuilder::new("s", Frequency::Daily, vec!["2330".into()]).unwrap();
        b.add_action(buy()).unwrap();
        assert_eq!(b.actions()[0].asset_id, json!("2330"));
        assert_eq!(b.definition().indicators, vec!["3".to_string()]);
    }

    #[test]
    fn missing_asset_with_several_assets_fails() {
        let mut b =
            StrategyBuilder::new("s", Frequency::Daily, vec!["A".into(), "B".into()]).unwrap();
        assert!(b.add_action(buy()).is_err());
        assert!(b.actions().is_empty());
    }

    #[test]
    fn edit_rule_list() {
        let mut b = StrategyBuilder::new("s", Frequency::Daily, vec!["2330".into()]).unwrap();
        b.add_action(buy()).unwrap().add_action(sell()).unwrap();
        let old = b.replace_action(0, sell()).unwrap();
        assert_eq!(old.side, "buy");
        let removed = b.delete_action(1).unwrap();
        assert_eq!(removed.side, "sell");
        assert_eq!(b.actions().len(), 1);
        assert!(b.delete_action(5).is_err());
        // asset used as its own indicator is not registered twice
        assert_eq!(b.definition().indicators, vec!["3".to_string()]);
    }

    #[test]
    fn builder_round_trips_through_json() {
        let mut b = StrategyBuilder::new("cross", Frequency::Weekly, vec!["2330".into()]).unwrap();
        b.add_action(buy()).unwrap().add_action(sell()).unwrap();
        let json = b.to_json().unwrap();
        let back = StrategyDefinition::from_json(&json).unwrap();
        assert_eq!(&back, b.definition());
        assert_eq!(back.frequency, Frequency::Weekly);
        assert_eq!(back.actions().unwrap().len(), 2);
    }

    #[test]
    fn validate_accepts_rules_awaiting_an_asset() {
        let mut def = StrategyDefinition::from_json(r#"{"name": "s"}"#).unwrap();
        def.rules.push(buy());
        assert!(def.validate().is_ok());
        assert!(def.actions().is_err());
    }

    #[test]
    fn empty_steps_use_default_pipeline() {
        let def = StrategyDefinition::from_json(
            r#"{"name": "s", "frequency": "M", "assets": ["A"]}"#,
        )
        .unwrap();
        assert_eq!(def.pipeline()[0].class, "run_monthly");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_step_and_bad_rule() {
        let mut def = StrategyDefinition::from_json(r#"{"name": "s", "assets": ["A"]}"#).unwrap();
        def.steps = vec![StepDescriptor::new("weigh_magic")];
        assert!(def.validate().unwrap_err().to_string().contains("weigh_magic"));

        def.steps.clear();
        def.rules.push(rule(json!({
            "rule_kind": "threshold_breach",
            "indicator_id": "A",
            "side": "short",
            "params": {"threshold": 1.0, "n": 2, "sign": 1}
        })));
        assert!(def.validate().is_err());
    }

    #[test]
    fn indicator_ids_merge_declared_and_rule_ids() {
        let def = StrategyDefinition {
            name: "s".into(),
            frequency: Frequency::Daily,
            assets: vec!["2330".into()],
            indicators: vec!["3".into()],
            rules: vec![buy(), sell()],
            steps: Vec::new(),
        };
        assert_eq!(def.indicator_ids().unwrap(), vec!["3".to_string(), "2330".to_string()]);
    }
}
