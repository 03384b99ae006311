//! Round-trip trade reconstruction from a position history.
//!
//! Per asset, position changes are walked in date order. A round trip closes
//! when the running sum of changes since the last close returns to exactly
//! zero. Its realized value is the closing fill's notional minus the notional
//! of every earlier fill in the segment. Open tails are not reported.

use chrono::NaiveDate;

use crate::domain::error::RuletraderError;
use crate::domain::frame::Frame;

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub asset_id: String,
    pub open_date: NaiveDate,
    pub close_date: NaiveDate,
    pub realized_value: f64,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.realized_value > 0.0
    }
}

/// Per-period position changes; the first change is the first position.
fn deltas(positions: &[f64]) -> Vec<f64> {
    positions
        .iter()
        .enumerate()
        .map(|(i, p)| if i == 0 { *p } else { p - positions[i - 1] })
        .collect()
}

pub fn reconstruct(positions: &Frame, prices: &Frame) -> Result<Vec<Trade>, RuletraderError> {
    if positions.dates != prices.dates {
        return Err(RuletraderError::validation(
            "position and price histories must share one date index",
        ));
    }

    let mut trades = Vec::new();
    for column in &positions.columns {
        let price = prices.column(&column.name).ok_or_else(|| {
            RuletraderError::validation(format!("asset ID {} not in price history", column.name))
        })?;

        let fills: Vec<(usize, f64)> = deltas(&column.values)
            .into_iter()
            .enumerate()
            .filter(|(_, d)| *d != 0.0 && d.is_finite())
            .collect();

        let mut segment: Vec<(usize, f64)> = Vec::new();
        let mut running = 0.0;
        for (row, delta) in fills {
            segment.push((row, delta));
            running += delta;
            if running != 0.0 {
                continue;
            }
            let notionals: Vec<f64> = segment
                .iter()
                .map(|(r, d)| d.abs() * price.values[*r])
                .collect();
            let realized_value = match notionals.split_last() {
                Some((last, prior)) => last - prior.iter().sum::<f64>(),
                None => 0.0,
            };
            trades.push(Trade {
                asset_id: column.name.clone(),
                open_date: positions.dates[segment[0].0],
                close_date: positions.dates[row],
                realized_value,
            });
            segment.clear();
        }
    }

    tracing::debug!(trades = trades.len(), "reconstructed round trips");
    Ok(trades)
}

/// Number of nonzero position changes across every asset.
pub fn trading_times(positions: &Frame) -> usize {
    positions
        .columns
        .iter()
        .map(|c| deltas(&c.values).iter().filter(|d| **d != 0.0 && d.is_finite()).count())
        .sum()
}
