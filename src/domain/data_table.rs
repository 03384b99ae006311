//! Aligned asset and indicator tables.
//!
//! Every input series is resampled to the finest declared frequency (last
//! observation per bucket), rows with a missing value are dropped, and the
//! asset and indicator tables are restricted to their common dates.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;
use crate::domain::frequency::Frequency;

/// Replacement for zero indicator readings, keeping ratio math finite.
pub const INDICATOR_EPSILON: f64 = 1e-6;

/// One raw input series as delivered by a data port.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInput {
    pub name: String,
    pub frequency: Frequency,
    pub points: Vec<(NaiveDate, f64)>,
}

impl SeriesInput {
    pub fn new(name: impl Into<String>, frequency: Frequency, points: Vec<(NaiveDate, f64)>) -> Self {
        SeriesInput {
            name: name.into(),
            frequency,
            points,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    pub frequency: Frequency,
    pub asset: Frame,
    pub indicator: Frame,
    pub asset_ids: Vec<String>,
    pub indicator_ids: Vec<String>,
}

impl DataTable {
    pub fn build(
        assets: Vec<SeriesInput>,
        indicators: Vec<SeriesInput>,
    ) -> Result<Self, RuletraderError> {
        if assets.is_empty() {
            return Err(RuletraderError::validation("asset not in params"));
        }
        check_inputs(&assets)?;
        check_inputs(&indicators)?;

        let frequency = Frequency::finest(
            assets
                .iter()
                .chain(indicators.iter())
                .map(|s| s.frequency),
        )
        .unwrap_or(Frequency::Daily);

        let asset = resample(&assets, frequency)?;
        let asset_ids = asset.column_names();

        let (asset, indicator) = if indicators.is_empty() {
            let indicator = Frame::new(asset.dates.clone());
            (asset, indicator)
        } else {
            let indicator = resample(&indicators, frequency)?;
            let indicator_dates: HashSet<NaiveDate> = indicator.dates.iter().copied().collect();
            let common: Vec<NaiveDate> = asset
                .dates
                .iter()
                .copied()
                .filter(|d| indicator_dates.contains(d))
                .collect();
            let mut indicator = restrict(&indicator, &common);
            for column in &mut indicator.columns {
                for v in &mut column.values {
                    if *v == 0.0 {
                        *v = INDICATOR_EPSILON;
                    }
                }
            }
            (restrict(&asset, &common), indicator)
        };

        tracing::debug!(
            frequency = %frequency,
            rows = asset.len(),
            assets = asset_ids.len(),
            indicators = indicator.columns.len(),
            "built data table"
        );

        Ok(DataTable {
            frequency,
            indicator_ids: indicator.column_names(),
            asset,
            indicator,
            asset_ids,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.asset.dates
    }

    pub fn has_indicator(&self, id: &str) -> bool {
        self.indicator_ids.iter().any(|i| i == id)
    }

    /// Values of one indicator column, failing on unknown identifiers.
    pub fn indicator_values(&self, id: &str) -> Result<&[f64], RuletraderError> {
        self.indicator
            .column(id)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| {
                RuletraderError::validation(format!("indicator ID {id} not in Data Table"))
            })
    }
}

fn check_inputs(inputs: &[SeriesInput]) -> Result<(), RuletraderError> {
    let mut seen = HashSet::new();
    for input in inputs {
        if input.name.trim().is_empty() {
            return Err(RuletraderError::validation("name not in params"));
        }
        if input.points.is_empty() {
            return Err(RuletraderError::validation(format!(
                "series {} does not set value",
                input.name
            )));
        }
        if !seen.insert(input.name.as_str()) {
            return Err(RuletraderError::validation(format!(
                "duplicate series {}",
                input.name
            )));
        }
    }
    Ok(())
}

/// Outer-join `inputs` on resampled buckets and keep fully populated rows.
fn resample(inputs: &[SeriesInput], frequency: Frequency) -> Result<Frame, RuletraderError> {
    let per_series: Vec<BTreeMap<NaiveDate, f64>> = inputs
        .iter()
        .map(|input| {
            let mut points = input.points.clone();
            points.sort_by_key(|(d, _)| *d);
            let mut buckets = BTreeMap::new();
            for (d, v) in points {
                if v.is_finite() {
                    buckets.insert(frequency.bucket(d), v);
                }
            }
            buckets
        })
        .collect();

    let all_dates: BTreeSet<NaiveDate> = per_series
        .iter()
        .flat_map(|b| b.keys().copied())
        .collect();
    let dates: Vec<NaiveDate> = all_dates
        .into_iter()
        .filter(|d| per_series.iter().all(|b| b.contains_key(d)))
        .collect();

    let columns = inputs
        .iter()
        .zip(&per_series)
        .map(|(input, buckets)| {
            let values = dates.iter().filter_map(|d| buckets.get(d).copied()).collect();
            (input.name.clone(), values)
        })
        .collect();
    Frame::from_columns(dates, columns)
}

fn restrict(frame: &Frame, dates: &[NaiveDate]) -> Frame {
    let rows: Vec<usize> = dates.iter().filter_map(|d| frame.index_of(*d)).collect();
    let mut out = Frame::new(rows.iter().map(|&r| frame.dates[r]).collect());
    for column in &frame.columns {
        out.columns.push(crate::domain::frame::Column {
            name: column.name.clone(),
            values: rows.iter().map(|&r| column.values[r]).collect(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn daily(name: &str, start: NaiveDate, values: &[f64]) -> SeriesInput {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (start + chrono::Duration::days(i as i64), v))
            .collect();
        SeriesInput::new(name, Frequency::Daily, points)
    }

    #[test]
    fn requires_an_asset() {
        let err = DataTable::build(vec![], vec![]).unwrap_err();
        assert!(matches!(err, RuletraderError::Validation { .. }));
    }

    #[test]
    fn rejects_empty_series() {
        let empty = SeriesInput::new("A", Frequency::Daily, vec![]);
        assert!(DataTable::build(vec![empty], vec![]).is_err());
    }

    #[test]
    fn daily_and_monthly_resolve_to_daily() {
        let a = daily("A", date(1, 1), &[1.0; 40]);
        let b = SeriesInput::new("B", Frequency::Monthly, vec![(date(1, 1), 5.0), (date(2, 1), 6.0)]);
        let table = DataTable::build(vec![a, b], vec![]).unwrap();
        assert_eq!(table.frequency, Frequency::Daily);
        // only dates where both assets have an observation survive
        assert_eq!(table.dates(), &[date(1, 1), date(2, 1)]);
        assert_eq!(table.asset.value("B", 1), Some(6.0));
    }

    #[test]
    fn restricts_to_intersection_and_replaces_zero_indicators() {
        let asset = daily("A", date(1, 1), &[10.0, 11.0, 12.0, 13.0]);
        let ind = daily("I", date(1, 2), &[0.0, 2.0, 3.0, 4.0]);
        let table = DataTable::build(vec![asset], vec![ind]).unwrap();

        assert_eq!(table.dates(), &[date(1, 2), date(1, 3), date(1, 4)]);
        assert_eq!(table.indicator.dates, table.asset.dates);
        assert_eq!(table.indicator.value("I", 0), Some(INDICATOR_EPSILON));
        assert_eq!(table.asset.value("A", 0), Some(11.0));
        assert!(table.has_indicator("I"));
        assert!(table.indicator_values("X").is_err());
    }

    #[test]
    fn monthly_resample_takes_last_observation() {
        let input = SeriesInput::new(
            "A",
            Frequency::Monthly,
            vec![(date(1, 31), 3.0), (date(1, 5), 1.0), (date(2, 10), 4.0)],
        );
        let table = DataTable::build(vec![input], vec![]).unwrap();
        assert_eq!(table.dates(), &[date(1, 1), date(2, 1)]);
        assert_eq!(table.asset.columns[0].values, vec![3.0, 4.0]);
    }

    #[test]
    fn drops_rows_with_missing_values() {
        let a = daily("A", date(1, 1), &[1.0, 2.0, 3.0]);
        let b = daily("B", date(1, 2), &[5.0, f64::NAN, 7.0]);
        let table = DataTable::build(vec![a, b], vec![]).unwrap();
        assert_eq!(table.dates(), &[date(1, 2)]);
    }
}
