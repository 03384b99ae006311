//! JSON adapter: strategy files in, performance reports out.

use std::fs;
use std::path::Path;

use crate::domain::error::RuletraderError;
use crate::domain::performance::PerformanceReport;
use crate::domain::strategy::StrategyDefinition;
use crate::ports::report_port::ReportPort;

pub struct JsonAdapter;

impl JsonAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn load_strategy<P: AsRef<Path>>(&self, path: P) -> Result<StrategyDefinition, RuletraderError> {
        let content = fs::read_to_string(path.as_ref())?;
        StrategyDefinition::from_json(&content)
    }

    pub fn save_strategy<P: AsRef<Path>>(
        &self,
        definition: &StrategyDefinition,
        path: P,
    ) -> Result<(), RuletraderError> {
        fs::write(path, definition.to_json()?)?;
        Ok(())
    }
}

impl Default for JsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for JsonAdapter {
    fn write(&self, report: &PerformanceReport, output_path: &str) -> Result<(), RuletraderError> {
        let json = serde_json::to_string_pretty(report)?;
        fs::write(output_path, json)?;
        tracing::debug!(path = %output_path, "wrote report");
        Ok(())
    }
}
