//! Configuration validation.
//!
//! Validates all config fields before a backtest runs.

use crate::domain::error::RuletraderError;
use crate::domain::frequency::Frequency;
use crate::domain::params::DATE_FORMAT;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    validate_initial_capital(config)?;
    validate_commission(config)?;
    validate_risk_free_rate(config)?;
    validate_var_alpha(config)?;
    validate_dates(config)?;
    validate_assets(config)?;
    validate_data(config)?;
    validate_frequencies(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> RuletraderError {
    RuletraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> RuletraderError {
    RuletraderError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// Numeric value of a key that may be absent; present but unparseable is an error.
fn optional_number(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, RuletraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("{key} must be a number"))),
    }
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    if let Some(value) = optional_number(config, "backtest", "initial_capital")? {
        if value <= 0.0 {
            return Err(invalid(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
    }
    Ok(())
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    for key in ["commission_per_trade", "commission_pct"] {
        if let Some(value) = optional_number(config, "backtest", key)? {
            if value < 0.0 {
                return Err(invalid(
                    "backtest",
                    key,
                    format!("{key} must be non-negative"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    if let Some(value) = optional_number(config, "backtest", "risk_free_rate")? {
        if !(0.0..1.0).contains(&value) {
            return Err(invalid(
                "backtest",
                "risk_free_rate",
                "risk_free_rate must be between 0 and 1",
            ));
        }
    }
    Ok(())
}

fn validate_var_alpha(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    if let Some(value) = optional_number(config, "backtest", "var_alpha")? {
        if value <= 0.0 || value >= 1.0 {
            return Err(invalid(
                "backtest",
                "var_alpha",
                "var_alpha must be strictly between 0 and 1",
            ));
        }
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    let start_date = parse_date(config, "start_date")?;
    let end_date = parse_date(config, "end_date")?;

    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start >= end {
            return Err(invalid(
                "backtest",
                "start_date",
                "start_date must be before end_date",
            ));
        }
    }
    Ok(())
}

pub fn parse_date(config: &dyn ConfigPort, field: &str) -> Result<Option<NaiveDate>, RuletraderError> {
    match config.get_string("backtest", field) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Some)
            .map_err(|_| {
                invalid(
                    "backtest",
                    field,
                    format!("invalid {field} format, expected YYYY-MM-DD"),
                )
            }),
    }
}

fn validate_assets(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    if config.get_list("backtest", "assets").is_empty() {
        return Err(missing("backtest", "assets"));
    }
    Ok(())
}

fn validate_data(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    match config.get_string("data", "directory") {
        Some(s) if !s.trim().is_empty() => {}
        _ => return Err(missing("data", "directory")),
    }
    if let Some(code) = config.get_string("data", "default_frequency") {
        code.parse::<Frequency>()
            .map_err(|e| invalid("data", "default_frequency", e.to_string()))?;
    }
    Ok(())
}

fn validate_frequencies(config: &dyn ConfigPort) -> Result<(), RuletraderError> {
    for key in config.section_keys("frequency") {
        let code = config.get_string("frequency", &key).unwrap_or_default();
        code.parse::<Frequency>()
            .map_err(|e| invalid("frequency", &key, e.to_string()))?;
    }
    Ok(())
}
