//! CLI integration tests for command orchestration.
//!
//! Tests cover:
//! - Config parsing (build_backtest_config)
//! - Asset and frequency resolution
//! - Series loading through a mock data port
//! - Strategy file loading and validation
//! - Full pipeline writing a JSON report

mod common;

use common::*;
use ruletrader::adapters::file_config_adapter::FileConfigAdapter;
use ruletrader::cli;
use ruletrader::domain::config_validation::validate_backtest_config;
use ruletrader::domain::error::RuletraderError;
use ruletrader::domain::frequency::Frequency;
use ruletrader::domain::strategy::StrategyDefinition;
use std::io::Write;
use std::process::ExitCode;

fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const VALID_INI: &str = r#"
[data]
directory = ./data
default_frequency = D

[frequency]
cpi = M

[indicators]
ids = cpi

[backtest]
assets = 2330
start_date = 2024-01-01
end_date = 2024-12-31
initial_capital = 500000
commission_per_trade = 10.0
commission_pct = 0.001
risk_free_rate = 0.01
var_alpha = 0.01
"#;

mod config_parsing {
    use super::*;

    #[test]
    fn build_backtest_config_reads_every_field() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        validate_backtest_config(&adapter).unwrap();
        let config = cli::build_backtest_config(&adapter).unwrap();

        assert_eq!(config.start_date, Some(date(2024, 1, 1)));
        assert_eq!(config.end_date, Some(date(2024, 12, 31)));
        assert_eq!(config.initial_capital, 500_000.0);
        assert_eq!(config.commission_per_trade, 10.0);
        assert_eq!(config.commission_pct, 0.001);
        assert_eq!(config.risk_free_rate, 0.01);
        assert_eq!(config.var_alpha, 0.01);
        assert!(config.commission().is_some());
    }

    #[test]
    fn build_backtest_config_defaults() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nassets = 2330\n").unwrap();
        let config = cli::build_backtest_config(&adapter).unwrap();

        assert_eq!(config.start_date, None);
        assert_eq!(config.end_date, None);
        assert_eq!(config.initial_capital, 1_000_000.0);
        assert_eq!(config.var_alpha, 0.05);
        assert!(config.commission().is_none());
    }

    #[test]
    fn build_backtest_config_bad_date() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\nstart_date = 01/02/2024\n").unwrap();
        assert!(matches!(
            cli::build_backtest_config(&adapter),
            Err(RuletraderError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn load_config_missing_file_fails() {
        let code = cli::load_config(std::path::Path::new("/nonexistent/ruletrader.ini"))
            .err()
            .unwrap();
        assert_ne!(code, ExitCode::SUCCESS);
    }
}

mod resolution {
    use super::*;

    fn definition(assets: &[&str]) -> StrategyDefinition {
        StrategyDefinition {
            assets: assets.iter().map(|a| a.to_string()).collect(),
            ..StrategyDefinition::from_json(r#"{"name": "s"}"#).unwrap()
        }
    }

    #[test]
    fn config_assets_come_first() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nassets = 2330, 0050\n").unwrap();
        let assets = cli::resolve_assets(&adapter, &definition(&["0050", "2317"]));
        assert_eq!(assets, vec!["2330", "0050", "2317"]);
    }

    #[test]
    fn strategy_assets_used_without_config_list() {
        let adapter = FileConfigAdapter::from_string("[backtest]\n").unwrap();
        assert_eq!(cli::resolve_assets(&adapter, &definition(&["2330"])), vec!["2330"]);
    }

    #[test]
    fn series_frequency_precedence() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        assert_eq!(cli::series_frequency(&adapter, "CPI").unwrap(), Frequency::Monthly);
        assert_eq!(cli::series_frequency(&adapter, "2330").unwrap(), Frequency::Daily);

        let bare = FileConfigAdapter::from_string("[backtest]\n").unwrap();
        assert_eq!(cli::series_frequency(&bare, "2330").unwrap(), Frequency::Daily);

        let bad = FileConfigAdapter::from_string("[frequency]\n2330 = X\n").unwrap();
        assert!(cli::series_frequency(&bad, "2330").is_err());
    }
}

mod series_loading {
    use super::*;

    #[test]
    fn indicators_exclude_assets() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let mock = MockDataPort::new()
            .with_series("2330", &SWING_PRICES)
            .with_series("cpi", &[1.0, 1.1, 1.2]);
        let definition = StrategyDefinition::from_json(&swing_strategy_json("2330")).unwrap();

        let (assets, indicators) = cli::load_series(&mock, &adapter, &definition).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].name, "2330");
        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].name, "cpi");
        assert_eq!(indicators[0].frequency, Frequency::Monthly);
    }

    #[test]
    fn data_errors_propagate() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nassets = 2330\n").unwrap();
        let mock = MockDataPort::new().with_error("2330", "disk on fire");
        let definition = StrategyDefinition::from_json(r#"{"name": "s"}"#).unwrap();

        let err = cli::load_series(&mock, &adapter, &definition).unwrap_err();
        assert!(matches!(err, RuletraderError::Data { .. }));
        assert!(err.to_string().contains("disk on fire"));
    }
}

mod strategy_loading {
    use super::*;

    #[test]
    fn valid_strategy_file_loads() {
        let file = write_temp(&swing_strategy_json("2330"), ".json");
        let definition = cli::load_strategy(file.path()).unwrap();
        assert_eq!(definition.name, "swing");
        assert_eq!(definition.rules.len(), 2);
    }

    #[test]
    fn malformed_json_fails() {
        let file = write_temp("{ \"name\": ", ".json");
        assert_ne!(cli::load_strategy(file.path()).unwrap_err(), ExitCode::SUCCESS);
    }

    #[test]
    fn invalid_rule_fails() {
        let strategy = r#"{
            "name": "bad",
            "assets": ["2330"],
            "rules": [{"rule_kind": "moon_phase", "indicator_id": "2330", "side": "buy", "params": {}}]
        }"#;
        let file = write_temp(strategy, ".json");
        assert!(cli::load_strategy(file.path()).is_err());
    }
}

mod pipeline_mock {
    use super::*;

    fn config_without_window() -> FileConfigAdapter {
        FileConfigAdapter::from_string("[data]\ndirectory = .\n\n[backtest]\nassets = 2330\n").unwrap()
    }

    #[test]
    fn pipeline_writes_report() {
        let adapter = config_without_window();
        let mock = MockDataPort::new().with_series("2330", &SWING_PRICES);
        let definition = StrategyDefinition::from_json(&swing_strategy_json("2330")).unwrap();
        let bt_config = cli::build_backtest_config(&adapter).unwrap();

        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("report.json");
        let code = cli::run_backtest_pipeline(&mock, &adapter, &definition, &bt_config, Some(&output));

        assert_eq!(code, ExitCode::SUCCESS);
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        for key in [
            "profit_dropdown",
            "kelly",
            "sharp_ratio",
            "return_of_investment",
            "annualized_returns",
            "yearly_volatility",
            "value_at_risk",
            "equity",
            "dropdown",
            "weights",
            "trade_returns",
            "win_rate",
            "trading_times",
            "profit_factor",
            "payoff_ratio",
            "message",
            "max_dropdown",
        ] {
            assert!(value.get(key).is_some(), "report missing {key}");
        }
        assert_eq!(value["message"], "succeed");
    }

    #[test]
    fn pipeline_missing_series_fails() {
        let adapter = config_without_window();
        let mock = MockDataPort::new();
        let definition = StrategyDefinition::from_json(&swing_strategy_json("2330")).unwrap();
        let bt_config = cli::build_backtest_config(&adapter).unwrap();

        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("report.json");
        let code = cli::run_backtest_pipeline(&mock, &adapter, &definition, &bt_config, Some(&output));

        assert_ne!(code, ExitCode::SUCCESS);
        assert!(!output.exists());
    }

    #[test]
    fn signals_print_for_known_series() {
        let adapter = config_without_window();
        let mock = MockDataPort::new().with_series("2330", &SWING_PRICES);
        let definition = StrategyDefinition::from_json(&swing_strategy_json("2330")).unwrap();
        assert!(cli::print_signals(&mock, &adapter, &definition).is_ok());
    }
}
