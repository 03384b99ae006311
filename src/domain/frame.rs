//! Date-indexed column table.
//!
//! A `Frame` backs the asset and indicator tables, weight schedules and the
//! engine's position, price and weight histories. Every column holds exactly
//! one value per index date.

use chrono::NaiveDate;

use crate::domain::error::RuletraderError;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<Column>,
}

impl Frame {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Frame {
            dates,
            columns: Vec::new(),
        }
    }

    /// Build a frame from named columns, checking every column matches the index.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, RuletraderError> {
        let mut frame = Frame::new(dates);
        for (name, values) in columns {
            frame.push_column(name, values)?;
        }
        Ok(frame)
    }

    pub fn push_column(&mut self, name: String, values: Vec<f64>) -> Result<(), RuletraderError> {
        if values.len() != self.dates.len() {
            return Err(RuletraderError::validation(format!(
                "column {} has {} values for {} dates",
                name,
                values.len(),
                self.dates.len()
            )));
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// A frame with the same index and column names, every cell set to `fill`.
    pub fn filled_like(&self, fill: f64) -> Self {
        Frame {
            dates: self.dates.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: vec![fill; self.dates.len()],
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Position of `date` in the index.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// First index position whose date is on or after `date`.
    pub fn first_index_on_or_after(&self, date: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d < date)
    }

    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.column(name).and_then(|c| c.values.get(row).copied())
    }

    /// One row as `(column name, value)` pairs.
    pub fn row(&self, row: usize) -> Vec<(&str, f64)> {
        self.columns
            .iter()
            .filter_map(|c| c.values.get(row).map(|v| (c.name.as_str(), *v)))
            .collect()
    }

    /// Restrict the frame to dates within `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Frame {
        let lo = self.first_index_on_or_after(start);
        let hi = self.dates.partition_point(|d| *d <= end).max(lo);
        Frame {
            dates: self.dates[lo..hi].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: c.values[lo..hi].to_vec(),
                })
                .collect(),
        }
    }
}
