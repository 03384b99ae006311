//! Report output port trait.

use crate::domain::error::RuletraderError;
use crate::domain::performance::PerformanceReport;

/// Port for writing performance reports.
pub trait ReportPort {
    fn write(&self, report: &PerformanceReport, output_path: &str) -> Result<(), RuletraderError>;
}
