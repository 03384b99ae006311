#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use ruletrader::domain::data_table::SeriesInput;
use ruletrader::domain::error::RuletraderError;
use ruletrader::domain::frequency::Frequency;
use ruletrader::domain::rule::RuleWire;
use ruletrader::ports::data_port::DataPort;
use serde_json::{json, Value};

/// In-memory data port keyed by series id.
#[derive(Default)]
pub struct MockDataPort {
    pub series: HashMap<String, Vec<(NaiveDate, f64)>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, id: &str, values: &[f64]) -> Self {
        self.series.insert(id.to_string(), points(values));
        self
    }

    pub fn with_error(mut self, id: &str, reason: &str) -> Self {
        self.errors.insert(id.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(&self, id: &str, frequency: Frequency) -> Result<SeriesInput, RuletraderError> {
        if let Some(reason) = self.errors.get(id) {
            return Err(RuletraderError::Data {
                reason: reason.clone(),
            });
        }
        match self.series.get(id) {
            Some(points) => Ok(SeriesInput::new(id, frequency, points.clone())),
            None => Err(RuletraderError::Data {
                reason: format!("no series {id}"),
            }),
        }
    }

    fn list_series(&self) -> Result<Vec<String>, RuletraderError> {
        let mut ids: Vec<String> = self.series.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Consecutive calendar days from 2024-01-01.
pub fn day(i: usize) -> NaiveDate {
    date(2024, 1, 1) + Duration::days(i as i64)
}

pub fn points(values: &[f64]) -> Vec<(NaiveDate, f64)> {
    values.iter().enumerate().map(|(i, v)| (day(i), *v)).collect()
}

pub fn series(id: &str, values: &[f64]) -> SeriesInput {
    SeriesInput::new(id, Frequency::Daily, points(values))
}

/// Rises into the first round trip and falls through the second.
pub const SWING_PRICES: [f64; 10] = [100.0, 100.0, 102.0, 110.0, 108.0, 110.0, 105.0, 98.0, 97.0, 97.0];

pub fn fixed_dates(side: &str, asset: &str, days: &[usize]) -> RuleWire {
    let dates: Vec<Value> = days
        .iter()
        .map(|i| json!(day(*i).format("%Y-%m-%d").to_string()))
        .collect();
    serde_json::from_value(json!({
        "rule_kind": "fixed_dates",
        "indicator_id": asset,
        "asset_id": asset,
        "side": side,
        "params": {"sign": 1, "date": dates}
    }))
    .unwrap()
}

/// Long on days 1 and 5, flat again on days 3 and 7.
pub fn swing_strategy_json(asset: &str) -> String {
    let rules = vec![
        fixed_dates("buy", asset, &[1, 5]),
        fixed_dates("hold", asset, &[3, 7]),
    ];
    serde_json::to_string_pretty(&json!({
        "name": "swing",
        "frequency": "D",
        "assets": [asset],
        "rules": rules,
    }))
    .unwrap()
}
