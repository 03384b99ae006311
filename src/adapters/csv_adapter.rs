//! CSV file data adapter.
//!
//! One file per series, `<id>.csv`, with a `date,value` header and ISO dates.

use crate::domain::data_table::SeriesInput;
use crate::domain::error::RuletraderError;
use crate::domain::frequency::Frequency;
use crate::domain::params::DATE_FORMAT;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{id}.csv"))
    }
}

fn data_error(reason: impl Into<String>) -> RuletraderError {
    RuletraderError::Data {
        reason: reason.into(),
    }
}

impl DataPort for CsvAdapter {
    fn fetch_series(&self, id: &str, frequency: Frequency) -> Result<SeriesInput, RuletraderError> {
        let path = self.csv_path(id);
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut points = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record =
                result.map_err(|e| data_error(format!("{}: CSV parse error: {}", path.display(), e)))?;

            let date_str = record
                .get(0)
                .ok_or_else(|| data_error(format!("{}: missing date column", path.display())))?;
            let date = NaiveDate::parse_from_str(date_str.trim(), DATE_FORMAT).map_err(|e| {
                data_error(format!(
                    "{}: invalid date {:?} on row {}: {}",
                    path.display(),
                    date_str,
                    line + 1,
                    e
                ))
            })?;

            // blank cells are gaps, not errors
            let value_str = record.get(1).map(str::trim).unwrap_or_default();
            if value_str.is_empty() {
                continue;
            }
            let value: f64 = value_str.parse().map_err(|e| {
                data_error(format!(
                    "{}: invalid value {:?} on row {}: {}",
                    path.display(),
                    value_str,
                    line + 1,
                    e
                ))
            })?;
            points.push((date, value));
        }

        points.sort_by_key(|(date, _)| *date);
        tracing::debug!(series = %id, points = points.len(), frequency = %frequency, "loaded series");
        Ok(SeriesInput::new(id, frequency, points))
    }

    fn list_series(&self) -> Result<Vec<String>, RuletraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_error(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| data_error(format!("directory entry error: {e}")))?;
            let name = entry.file_name();
            if let Some(id) = name.to_string_lossy().strip_suffix(".csv") {
                ids.push(id.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}
