use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;

use crate::models::MeasurementPoint;

/// Values at or below this are due for replacement; no forecast is given.
pub const MIN_SAFE_VALUE: f64 = 20.0;

const SECONDS_PER_MONTH: f64 = 30.0 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    pub wear_rate_per_month: f64,
    pub months_remaining: f64,
    pub predicted_date: DateTime<Utc>,
    pub confidence: f64,
}

pub fn forecast(history: &[MeasurementPoint]) -> Option<ForecastResult> {
    forecast_at(history, Utc::now())
}

/// Estimates remaining service life from a wear history, anchored at `now`.
///
/// Returns `None` when there are fewer than two points, when no consecutive
/// pair shows non-negative wear over positive elapsed time, when the average
/// rate is not positive, or when the latest value is already at or below
/// [`MIN_SAFE_VALUE`].
pub fn forecast_at(history: &[MeasurementPoint], now: DateTime<Utc>) -> Option<ForecastResult> {
    if history.len() < 2 {
        return None;
    }

    let mut sorted = history.to_vec();
    sorted.sort_by_key(|point| point.timestamp);

    let rates: Vec<f64> = sorted
        .windows(2)
        .filter_map(|pair| {
            let delta = pair[1].timestamp - pair[0].timestamp;
            let elapsed = delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) / 1e9;
            let months = elapsed / SECONDS_PER_MONTH;
            let wear = pair[0].value - pair[1].value;
            (months > 0.0 && wear >= 0.0).then(|| wear / months)
        })
        .collect();

    if rates.is_empty() {
        return None;
    }

    let average_rate = mean(&rates);
    let latest = sorted.last()?.value;
    if average_rate <= 0.0 || latest <= MIN_SAFE_VALUE {
        return None;
    }

    let months_remaining = ((latest - MIN_SAFE_VALUE) / average_rate).max(0.0);
    let confidence = (100.0 - (variance(&rates, average_rate) / average_rate) * 100.0).clamp(0.0, 100.0);

    Some(ForecastResult {
        wear_rate_per_month: average_rate,
        months_remaining,
        predicted_date: add_fractional_months(now, months_remaining),
        confidence,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// Population variance.
fn variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Whole months move along the calendar; the remainder is taken as a share
/// of a 30-day month.
pub fn add_fractional_months(start: DateTime<Utc>, months: f64) -> DateTime<Utc> {
    let whole = months.trunc().min(u32::MAX as f64) as u32;
    let remainder_secs = (months.fract() * SECONDS_PER_MONTH).round() as i64;

    start
        .checked_add_months(Months::new(whole))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .checked_add_signed(Duration::seconds(remainder_secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap()
    }

    fn point(days: i64, value: f64) -> MeasurementPoint {
        MeasurementPoint {
            timestamp: t0() + Duration::days(days),
            value,
        }
    }

    #[test]
    fn needs_at_least_two_points() {
        assert_eq!(forecast_at(&[], t0()), None);
        assert_eq!(forecast_at(&[point(0, 50.0)], t0()), None);
    }

    #[test]
    fn single_pair_gives_exact_rate_and_full_confidence() {
        let now = t0() + Duration::days(30);
        let result = forecast_at(&[point(0, 50.0), point(30, 40.0)], now).unwrap();

        assert!((result.wear_rate_per_month - 10.0).abs() < 1e-9);
        assert!((result.months_remaining - 2.0).abs() < 1e-9);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.predicted_date, Utc.with_ymd_and_hms(2026, 3, 31, 8, 0, 0).unwrap());
    }

    #[test]
    fn input_order_does_not_matter() {
        let sorted = vec![point(0, 60.0), point(30, 55.0), point(60, 47.0), point(90, 41.0)];
        let shuffled = vec![sorted[2].clone(), sorted[0].clone(), sorted[3].clone(), sorted[1].clone()];

        assert_eq!(forecast_at(&sorted, t0()), forecast_at(&shuffled, t0()));
    }

    #[test]
    fn increase_in_value_is_not_wear() {
        assert_eq!(forecast_at(&[point(0, 40.0), point(30, 45.0)], t0()), None);
    }

    #[test]
    fn replacement_between_readings_is_skipped() {
        // 50 -> 40 wear, then brush replaced (40 -> 60), then 60 -> 50 wear.
        let history = vec![point(0, 50.0), point(30, 40.0), point(45, 60.0), point(75, 50.0)];
        let result = forecast_at(&history, t0()).unwrap();

        assert!((result.wear_rate_per_month - 10.0).abs() < 1e-9);
        assert!((result.months_remaining - 3.0).abs() < 1e-9);
    }

    #[test]
    fn at_or_below_threshold_gives_no_forecast() {
        assert_eq!(forecast_at(&[point(0, 30.0), point(30, 20.0)], t0()), None);
        assert_eq!(forecast_at(&[point(0, 25.0), point(30, 18.0)], t0()), None);
        assert_eq!(forecast_at(&[point(0, 15.0), point(30, 19.0)], t0()), None);
    }

    #[test]
    fn flat_history_gives_no_forecast() {
        assert_eq!(forecast_at(&[point(0, 40.0), point(30, 40.0)], t0()), None);
    }

    #[test]
    fn same_timestamp_pairs_are_ignored() {
        assert_eq!(forecast_at(&[point(0, 50.0), point(0, 40.0)], t0()), None);
    }

    #[test]
    fn sub_second_gap_still_counts_as_elapsed_time() {
        let history = vec![
            point(0, 50.0),
            point(30, 40.0),
            MeasurementPoint {
                timestamp: t0() + Duration::days(30) + Duration::milliseconds(500),
                value: 40.0,
            },
        ];
        let result = forecast_at(&history, t0()).unwrap();

        // Rates of 10 and 0: mean 5, variance 25, confidence floors at 0.
        assert!((result.wear_rate_per_month - 5.0).abs() < 1e-9);
        assert!((result.months_remaining - 4.0).abs() < 1e-9);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn inconsistent_rates_lower_confidence() {
        // Rates of 2 and 6 mm/month: mean 4, population variance 4, confidence 0.
        let history = vec![point(0, 60.0), point(30, 58.0), point(60, 52.0)];
        let result = forecast_at(&history, t0()).unwrap();
        assert!((result.wear_rate_per_month - 4.0).abs() < 1e-9);
        assert_eq!(result.confidence, 0.0);

        // Rates of 10 and 12: mean 11, variance 1, confidence 100 - 100/11.
        let history = vec![point(0, 80.0), point(30, 70.0), point(60, 58.0)];
        let result = forecast_at(&history, t0()).unwrap();
        assert!((result.confidence - (100.0 - 100.0 / 11.0)).abs() < 1e-9);
    }

    #[test]
    fn fractional_months_land_inside_the_month() {
        let start = t0();
        assert_eq!(
            add_fractional_months(start, 1.5),
            Utc.with_ymd_and_hms(2026, 2, 16, 8, 0, 0).unwrap()
        );
        assert_eq!(add_fractional_months(start, 0.0), start);
    }
}
