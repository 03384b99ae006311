//! Time-series primitives shared by rule evaluation and performance math.
//!
//! Every function works on `&[Option<f64>]` where `None` marks a missing
//! observation. Rolling windows only produce a value once the window is fully
//! populated; any missing value inside the window yields `None`.

/// Shift values forward by `periods`, padding the front with `None`.
pub fn shift(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for i in periods..values.len() {
        out[i] = values[i - periods];
    }
    out
}

fn rolling(values: &[Option<f64>], window: usize, reduce: fn(&[f64]) -> f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let mut buf: Vec<f64> = Vec::with_capacity(window);
    for i in (window - 1)..values.len() {
        buf.clear();
        for v in &values[i + 1 - window..=i] {
            match v {
                Some(x) => buf.push(*x),
                None => break,
            }
        }
        if buf.len() == window {
            out[i] = Some(reduce(&buf));
        }
    }
    out
}

pub fn rolling_min(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_max(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// First difference: `x[i] - x[i-1]`.
pub fn diff(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for i in 1..values.len() {
        if let (Some(curr), Some(prev)) = (values[i], values[i - 1]) {
            out[i] = Some(curr - prev);
        }
    }
    out
}

/// Percentage change over `periods`: `x[i] / x[i-periods] - 1`.
pub fn pct_change(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for i in periods..values.len() {
        if let (Some(curr), Some(base)) = (values[i], values[i - periods]) {
            out[i] = Some(curr / base - 1.0);
        }
    }
    out
}

/// Forward-fill missing values; leading gaps stay missing.
pub fn ffill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}

/// Indices where `now` holds at `i` and `before` held at `i - 1`.
///
/// Missing values never satisfy either predicate, so index 0 is never
/// reported.
pub fn edges(
    values: &[Option<f64>],
    now: impl Fn(f64) -> bool,
    before: impl Fn(f64) -> bool,
) -> Vec<usize> {
    (1..values.len())
        .filter(|&i| {
            values[i].is_some_and(&now) && values[i - 1].is_some_and(&before)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|&v| Some(v)).collect()
    }

    #[test]
    fn shift_pads_front() {
        let shifted = shift(&some(&[1.0, 2.0, 3.0]), 1);
        assert_eq!(shifted, vec![None, Some(1.0), Some(2.0)]);
    }

    #[test]
    fn rolling_min_requires_full_window() {
        let out = rolling_min(&some(&[3.0, 1.0, 2.0, 5.0]), 2);
        assert_eq!(out, vec![None, Some(1.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn rolling_max_skips_windows_with_gaps() {
        let values = vec![None, Some(1.0), Some(4.0), Some(2.0)];
        let out = rolling_max(&values, 2);
        assert_eq!(out, vec![None, None, Some(4.0), Some(4.0)]);
    }

    #[test]
    fn rolling_mean_basic() {
        let out = rolling_mean(&some(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[3], Some(3.0));
        assert!(out[1].is_none());
    }

    #[test]
    fn rolling_zero_window_is_empty() {
        let out = rolling_mean(&some(&[1.0, 2.0]), 0);
        assert!(out.iter().all(|v| v.is_none()));
    }

    #[test]
    fn diff_and_pct_change() {
        let values = some(&[100.0, 110.0, 99.0]);
        assert_eq!(diff(&values), vec![None, Some(10.0), Some(-11.0)]);
        let pct = pct_change(&values, 2);
        assert!(pct[1].is_none());
        assert!((pct[2].unwrap() - (-0.01)).abs() < 1e-12);
    }

    #[test]
    fn ffill_keeps_leading_gap() {
        let values = vec![None, Some(1.0), None, Some(3.0), None];
        assert_eq!(
            ffill(&values),
            vec![None, Some(1.0), Some(1.0), Some(3.0), Some(3.0)]
        );
    }

    #[test]
    fn edges_never_fire_at_start() {
        let values = some(&[5.0, 1.0, 5.0]);
        let hits = edges(&values, |v| v >= 5.0, |v| v < 5.0);
        assert_eq!(hits, vec![2]);
    }
}
