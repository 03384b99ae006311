//! Validation and coercion of wire-level parameter maps.
//!
//! Rule and pipeline-step parameters arrive as JSON objects. Required keys must
//! be present and non-null; numeric fields accept numbers or numeric strings
//! and are coerced to the type the consumer needs.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::domain::error::RuletraderError;

pub type ParamMap = Map<String, Value>;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct Params<'a> {
    map: &'a ParamMap,
    context: &'a str,
}

impl<'a> Params<'a> {
    pub fn new(map: &'a ParamMap, context: &'a str) -> Self {
        Params { map, context }
    }

    /// Fail on the first key that is missing or null.
    pub fn require(&self, keys: &[&str]) -> Result<(), RuletraderError> {
        for key in keys {
            self.value(key)?;
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn value(&self, key: &str) -> Result<&'a Value, RuletraderError> {
        match self.map.get(key) {
            None => Err(RuletraderError::validation(format!(
                "{}: {} not in params",
                self.context, key
            ))),
            Some(Value::Null) => Err(RuletraderError::validation(format!(
                "{}: {} does not set value",
                self.context, key
            ))),
            Some(v) => Ok(v),
        }
    }

    fn type_error(&self, key: &str, expected: &str) -> RuletraderError {
        RuletraderError::validation(format!(
            "{}: {} should be {}",
            self.context, key, expected
        ))
    }

    pub fn int(&self, key: &str) -> Result<i64, RuletraderError> {
        let value = self.value(key)?;
        as_int(value).ok_or_else(|| self.type_error(key, "int"))
    }

    pub fn float(&self, key: &str) -> Result<f64, RuletraderError> {
        let value = self.value(key)?;
        as_float(value).ok_or_else(|| self.type_error(key, "float"))
    }

    /// A window length or count; must be at least `min`.
    pub fn count(&self, key: &str, min: i64) -> Result<usize, RuletraderError> {
        let n = self.int(key)?;
        if n < min {
            return Err(RuletraderError::validation(format!(
                "{}: {} should be at least {}",
                self.context, key, min
            )));
        }
        Ok(n as usize)
    }

    pub fn count_or(&self, key: &str, min: i64, default: usize) -> Result<usize, RuletraderError> {
        match self.lookup(key) {
            Some(_) => self.count(key, min),
            None => Ok(default),
        }
    }

    pub fn float_or(&self, key: &str, default: f64) -> Result<f64, RuletraderError> {
        match self.lookup(key) {
            Some(_) => self.float(key),
            None => Ok(default),
        }
    }

    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, RuletraderError> {
        match self.lookup(key) {
            Some(_) => self.int(key),
            None => Ok(default),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, RuletraderError> {
        match self.lookup(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(self.type_error(key, "bool")),
            None => Ok(default),
        }
    }

    pub fn optional_count(&self, key: &str, min: i64) -> Result<Option<usize>, RuletraderError> {
        match self.lookup(key) {
            Some(_) => self.count(key, min).map(Some),
            None => Ok(None),
        }
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, RuletraderError> {
        match self.lookup(key) {
            Some(_) => {
                let v = self.int(key)?;
                u64::try_from(v)
                    .map(Some)
                    .map_err(|_| self.type_error(key, "a non-negative int"))
            }
            None => Ok(None),
        }
    }

    pub fn date(&self, key: &str) -> Result<NaiveDate, RuletraderError> {
        let value = self.value(key)?;
        parse_date_value(value).ok_or_else(|| self.type_error(key, "a yyyy-mm-dd date"))
    }

    pub fn date_list(&self, key: &str) -> Result<Vec<NaiveDate>, RuletraderError> {
        let items = self.list(key, "list of datetime format")?;
        items
            .iter()
            .map(|v| {
                parse_date_value(v).ok_or_else(|| self.type_error(key, "list of datetime format"))
            })
            .collect()
    }

    pub fn id_list(&self, key: &str) -> Result<Vec<String>, RuletraderError> {
        let items = self.list(key, "a list of ids")?;
        items.iter().map(coerce_id).collect()
    }

    /// An `{id: weight}` object.
    pub fn weight_map(&self, key: &str) -> Result<BTreeMap<String, f64>, RuletraderError> {
        match self.value(key)? {
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| {
                    as_float(v)
                        .map(|w| (k.clone(), w))
                        .ok_or_else(|| self.type_error(key, "a map of float weights"))
                })
                .collect(),
            _ => Err(self.type_error(key, "a map of float weights")),
        }
    }

    pub fn float_pair_or(&self, key: &str, default: (f64, f64)) -> Result<(f64, f64), RuletraderError> {
        match self.lookup(key) {
            Some(Value::Array(items)) if items.len() == 2 => {
                match (as_float(&items[0]), as_float(&items[1])) {
                    (Some(lo), Some(hi)) => Ok((lo, hi)),
                    _ => Err(self.type_error(key, "a pair of floats")),
                }
            }
            Some(_) => Err(self.type_error(key, "a pair of floats")),
            None => Ok(default),
        }
    }

    fn list(&self, key: &str, expected: &str) -> Result<&'a Vec<Value>, RuletraderError> {
        match self.value(key)? {
            Value::Array(items) => {
                if items.iter().any(Value::is_null) {
                    return Err(RuletraderError::validation(format!(
                        "{}: {} does not set value",
                        self.context, key
                    )));
                }
                Ok(items)
            }
            _ => Err(self.type_error(key, expected)),
        }
    }
}

pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
}

/// Asset and indicator ids may be given as strings or numbers.
pub fn coerce_id(value: &Value) -> Result<String, RuletraderError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(RuletraderError::validation(
            "ID should be str(preferred), int, or float",
        )),
    }
}
