//! Core domain types and logic.

pub mod series;
pub mod frame;
pub mod frequency;
pub mod data_table;
pub mod params;
pub mod rule;
pub mod rule_eval;
pub mod action_merger;
pub mod composition;
pub mod pipeline;
pub mod trade;
pub mod performance;
pub mod backtest;
pub mod strategy;
pub mod config_validation;
pub mod error;
