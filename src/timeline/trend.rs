//! # Trend Pipeline
//!
//! Pure statistical helpers for the timeline engine: outlier removal,
//! gap interpolation, moving-average smoothing, and an ordinary
//! least-squares fit that classifies the direction of the target-count
//! series and scores its confidence.
//!
//! Every degenerate case (empty series, zero variance, zero elapsed
//! time) collapses to 0 or "stable"; nothing in here may panic or
//! divide by zero.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One point of the series being analyzed: a timestamp and a value
/// (bucket target count, possibly interpolated).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Direction of the fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Outcome of the full trend pipeline over an analysis window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// OLS slope in value units per hour.
    pub slope: f64,
    /// R-squared of the fit; 0 below 3 points.
    pub confidence: f64,
    /// (last - first) / elapsed hours over the processed series.
    pub change_rate: f64,
    /// Points remaining after outlier removal and interpolation.
    pub point_count: usize,
}

impl TrendAnalysis {
    /// The degenerate analysis for series too short to say anything.
    pub fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            slope: 0.0,
            confidence: 0.0,
            change_rate: 0.0,
            point_count: 0,
        }
    }
}

/// Slope magnitude below which a series counts as stable.
const STABLE_SLOPE_EPSILON: f64 = 0.1;
/// Centered moving-average window.
const SMOOTHING_WINDOW: usize = 3;
/// Minimum series length before outlier removal is attempted.
const OUTLIER_MIN_POINTS: usize = 4;
/// Deviation from the mean (in standard deviations) marking an outlier.
const OUTLIER_SIGMA: f64 = 2.0;

/// Run the full pipeline: outliers -> interpolation -> smoothing -> fit.
///
/// `max_gap_hours` is the largest tolerated spacing between consecutive
/// points before linear interpolation fills the gap.
pub fn analyze(points: &[TrendPoint], max_gap_hours: f64) -> TrendAnalysis {
    let cleaned = remove_outliers(points);
    let filled = interpolate_gaps(&cleaned, max_gap_hours);
    let smoothed = moving_average(&filled, SMOOTHING_WINDOW);

    let (slope, confidence) = linear_fit(&smoothed);
    let direction = classify_direction(slope, smoothed.len());

    TrendAnalysis {
        direction,
        slope,
        confidence,
        change_rate: change_rate(&smoothed),
        point_count: smoothed.len(),
    }
}

/// Drop points whose value deviates from the series mean by more than
/// two standard deviations. Series with fewer than 4 points are returned
/// untouched (too little data to call anything an outlier).
pub fn remove_outliers(points: &[TrendPoint]) -> Vec<TrendPoint> {
    if points.len() < OUTLIER_MIN_POINTS {
        return points.to_vec();
    }

    let mean = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;
    let variance = points
        .iter()
        .map(|p| (p.value - mean).powi(2))
        .sum::<f64>()
        / points.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return points.to_vec();
    }

    points
        .iter()
        .filter(|p| (p.value - mean).abs() <= OUTLIER_SIGMA * std_dev)
        .copied()
        .collect()
}

/// Fill gaps larger than `max_gap_hours` with evenly time-spaced,
/// linearly interpolated points so no consecutive pair is further apart
/// than the threshold.
pub fn interpolate_gaps(points: &[TrendPoint], max_gap_hours: f64) -> Vec<TrendPoint> {
    if points.len() < 2 || max_gap_hours <= 0.0 {
        return points.to_vec();
    }

    let mut filled = Vec::with_capacity(points.len());
    filled.push(points[0]);

    for pair in points.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let gap_hours = (next.timestamp - prev.timestamp).num_seconds() as f64 / 3600.0;

        if gap_hours > max_gap_hours {
            // Smallest number of segments that brings every sub-gap
            // under the threshold.
            let segments = (gap_hours / max_gap_hours).ceil() as i64;
            for i in 1..segments {
                let frac = i as f64 / segments as f64;
                let offset_secs =
                    ((next.timestamp - prev.timestamp).num_seconds() as f64 * frac) as i64;
                filled.push(TrendPoint {
                    timestamp: prev.timestamp + Duration::seconds(offset_secs),
                    value: prev.value + (next.value - prev.value) * frac,
                });
            }
        }
        filled.push(next);
    }

    filled
}

/// Centered moving average. A series shorter than the window is returned
/// unsmoothed. Edge points where the full window does not fit are passed
/// through unchanged, so an already-linear series stays exactly linear.
pub fn moving_average(points: &[TrendPoint], window: usize) -> Vec<TrendPoint> {
    if points.len() < window || window == 0 {
        return points.to_vec();
    }

    let half = window / 2;
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if i < half || i + half >= points.len() {
                return *p;
            }
            let slice = &points[i - half..=i + half];
            let avg = slice.iter().map(|q| q.value).sum::<f64>() / slice.len() as f64;
            TrendPoint {
                timestamp: p.timestamp,
                value: avg,
            }
        })
        .collect()
}

/// Ordinary least-squares fit of value against time in hours since the
/// first point. Returns `(slope, r_squared)`.
///
/// Fewer than 2 points yields a zero slope; fewer than 3 yields zero
/// confidence. A flat series (zero total sum of squares) counts as a
/// perfect fit only when the residuals are also zero; the degenerate
/// division yields 0 instead.
pub fn linear_fit(points: &[TrendPoint]) -> (f64, f64) {
    if points.len() < 2 {
        return (0.0, 0.0);
    }

    let origin = points[0].timestamp;
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.timestamp - origin).num_seconds() as f64 / 3600.0)
        .collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();
    let n = xs.len() as f64;

    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let sxy: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    if sxx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = sxy / sxx;

    if points.len() < 3 {
        return (slope, 0.0);
    }

    let intercept = mean_y - slope * mean_x;
    let ss_res: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();

    let r_squared = if ss_tot == 0.0 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };

    (slope, r_squared)
}

/// Classify a slope; series with fewer than 2 points are stable.
pub fn classify_direction(slope: f64, point_count: usize) -> TrendDirection {
    if point_count < 2 || slope.abs() < STABLE_SLOPE_EPSILON {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    }
}

/// (last value - first value) / elapsed hours. 0 below 2 points or when
/// the series spans no time.
pub fn change_rate(points: &[TrendPoint]) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) if points.len() >= 2 => (f, l),
        _ => return 0.0,
    };

    let elapsed_hours = (last.timestamp - first.timestamp).num_seconds() as f64 / 3600.0;
    if elapsed_hours == 0.0 {
        return 0.0;
    }
    (last.value - first.value) / elapsed_hours
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly_series(values: &[f64]) -> Vec<TrendPoint> {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TrendPoint {
                timestamp: start + Duration::hours(i as i64),
                value: v,
            })
            .collect()
    }

    #[test]
    fn perfect_linear_series_is_increasing_with_full_confidence() {
        let points = hourly_series(&[10.0, 12.0, 14.0, 16.0, 18.0, 20.0]);
        let analysis = analyze(&points, 24.0);

        assert_eq!(analysis.direction, TrendDirection::Increasing);
        assert!((analysis.confidence - 1.0).abs() < 1e-9);
        assert!((analysis.slope - 2.0).abs() < 1e-9);
        assert!((analysis.change_rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn constant_series_is_stable_with_zero_change_rate() {
        let points = hourly_series(&[5.0, 5.0, 5.0, 5.0, 5.0]);
        let analysis = analyze(&points, 24.0);

        assert_eq!(analysis.direction, TrendDirection::Stable);
        assert_eq!(analysis.change_rate, 0.0);
        assert_eq!(analysis.slope, 0.0);
    }

    #[test]
    fn decreasing_series_is_classified_by_sign() {
        let points = hourly_series(&[20.0, 16.0, 12.0, 8.0]);
        let analysis = analyze(&points, 24.0);
        assert_eq!(analysis.direction, TrendDirection::Decreasing);
    }

    #[test]
    fn short_series_degrades_to_stable() {
        assert_eq!(analyze(&[], 24.0).direction, TrendDirection::Stable);
        let one = hourly_series(&[7.0]);
        let analysis = analyze(&one, 24.0);
        assert_eq!(analysis.direction, TrendDirection::Stable);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.change_rate, 0.0);
    }

    #[test]
    fn outliers_are_dropped_above_two_sigma() {
        let points = hourly_series(&[10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0, 500.0]);
        let cleaned = remove_outliers(&points);
        assert_eq!(cleaned.len(), points.len() - 1);
        assert!(cleaned.iter().all(|p| p.value < 100.0));
    }

    #[test]
    fn outlier_removal_skipped_below_four_points() {
        let points = hourly_series(&[1.0, 1.0, 1000.0]);
        assert_eq!(remove_outliers(&points).len(), 3);
    }

    #[test]
    fn gaps_are_filled_below_threshold() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let points = vec![
            TrendPoint { timestamp: start, value: 0.0 },
            TrendPoint {
                timestamp: start + Duration::hours(10),
                value: 10.0,
            },
        ];

        let filled = interpolate_gaps(&points, 2.0);
        assert_eq!(filled.len(), 6); // 4 interpolated points between the two

        for pair in filled.windows(2) {
            let gap = (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64 / 3600.0;
            assert!(gap <= 2.0 + 1e-9);
        }
        // Linear values along the way.
        assert!((filled[1].value - 2.0).abs() < 1e-9);
        assert!((filled[3].value - 6.0).abs() < 1e-9);
    }

    #[test]
    fn smoothing_leaves_short_series_alone() {
        let points = hourly_series(&[3.0, 9.0]);
        assert_eq!(moving_average(&points, 3), points);
    }

    #[test]
    fn smoothing_dampens_spikes() {
        let points = hourly_series(&[10.0, 10.0, 40.0, 10.0, 10.0]);
        let smoothed = moving_average(&points, 3);
        assert!(smoothed[2].value < 40.0);
        assert!(smoothed[2].value > 10.0);
        // Edges pass through unchanged.
        assert_eq!(smoothed[0].value, 10.0);
        assert_eq!(smoothed[4].value, 10.0);
        assert_eq!(smoothed.len(), points.len());
    }

    #[test]
    fn fit_handles_zero_time_span() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let points = vec![
            TrendPoint { timestamp: ts, value: 1.0 },
            TrendPoint { timestamp: ts, value: 2.0 },
        ];
        let (slope, r2) = linear_fit(&points);
        assert_eq!(slope, 0.0);
        assert_eq!(r2, 0.0);
        assert_eq!(change_rate(&points), 0.0);
    }
}
