//! Pure transforms over daily traffic series.
//!
//! Inputs are expected sorted ascending by date; [`validate_series`] checks
//! that before anything else runs on data from the outside world.

use crate::error::AnalyticsError;
use crate::types::{
    AggregateResult, AnalyticsQuery, Granularity, Metric, MetricKind, TimeSeriesPoint,
    WeekAlignment, WeeklyPoint,
};
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeMap;

const BUCKET_DAYS: i64 = 7;

/// Trailing mean over at most `window` points.
///
/// The window grows from the left edge until it is full, so early points are
/// averaged over what exists rather than padded with zeros. A `window` of 0
/// is treated as 1.
pub fn rolling_average(data: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..data.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &data[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

fn bucket_start(date: NaiveDate, anchor: NaiveDate, alignment: WeekAlignment) -> NaiveDate {
    match alignment {
        WeekAlignment::Rolling => {
            let offset = (date - anchor).num_days().div_euclid(BUCKET_DAYS) * BUCKET_DAYS;
            anchor + Duration::days(offset)
        }
        WeekAlignment::Calendar => {
            date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
        }
    }
}

fn summarize(start: NaiveDate, points: &[&TimeSeriesPoint], metrics: &[Metric]) -> WeeklyPoint {
    let mut values = BTreeMap::new();
    for &metric in metrics {
        let present: Vec<f64> = points.iter().filter_map(|p| p.value(metric)).collect();
        // A metric absent from every day of the bucket is left out, not zeroed.
        if present.is_empty() {
            continue;
        }
        let sum: f64 = present.iter().sum();
        let value = match metric.kind() {
            MetricKind::Additive => sum,
            MetricKind::Rate => sum / present.len() as f64,
        };
        values.insert(metric, value);
    }
    WeeklyPoint {
        start,
        end: start + Duration::days(BUCKET_DAYS - 1),
        days: points.len(),
        values,
    }
}

/// Roll daily points up into 7-day buckets.
///
/// Additive metrics are summed; rate metrics are averaged over the days that
/// are actually present, so a partial trailing week is not deflated. Buckets
/// with no points are skipped. Empty input yields an empty vec.
pub fn weekly_rollup(
    points: &[TimeSeriesPoint],
    metrics: &[Metric],
    alignment: WeekAlignment,
) -> Vec<WeeklyPoint> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let anchor = first.date;

    let mut weeks = Vec::new();
    let mut current: Option<NaiveDate> = None;
    let mut bucket: Vec<&TimeSeriesPoint> = Vec::new();

    for point in points {
        let start = bucket_start(point.date, anchor, alignment);
        if current != Some(start) {
            if let Some(prev) = current {
                if !bucket.is_empty() {
                    weeks.push(summarize(prev, &bucket, metrics));
                }
            }
            bucket.clear();
            current = Some(start);
        }
        bucket.push(point);
    }
    if let Some(prev) = current {
        if !bucket.is_empty() {
            weeks.push(summarize(prev, &bucket, metrics));
        }
    }

    weeks
}

/// Check a fetched series before aggregating it: dates strictly ascending,
/// every requested metric present and finite.
pub fn validate_series(
    points: &[TimeSeriesPoint],
    metrics: &[Metric],
) -> Result<(), AnalyticsError> {
    for pair in points.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(AnalyticsError::MalformedSeries(format!(
                "dates not strictly ascending: {} followed by {}",
                pair[0].date, pair[1].date
            )));
        }
    }
    for point in points {
        for &metric in metrics {
            match point.value(metric) {
                Some(v) if v.is_finite() => {}
                Some(v) => {
                    return Err(AnalyticsError::MalformedSeries(format!(
                        "{metric} on {} is not finite ({v})",
                        point.date
                    )))
                }
                None => {
                    return Err(AnalyticsError::MalformedSeries(format!(
                        "{metric} missing on {}",
                        point.date
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Build the full result for `query` from an already validated series.
pub fn build_result(query: &AnalyticsQuery, points: Vec<TimeSeriesPoint>) -> AggregateResult {
    let metrics = query.normalized_metrics();

    let rolling = metrics
        .iter()
        .map(|&metric| {
            let series: Vec<f64> = points
                .iter()
                .map(|p| p.value(metric).unwrap_or(0.0))
                .collect();
            (metric, rolling_average(&series, query.window))
        })
        .collect();

    let weekly = match query.granularity {
        Granularity::Daily => None,
        Granularity::Weekly => Some(weekly_rollup(&points, &metrics, query.alignment)),
    };

    AggregateResult {
        range: query.range,
        daily: points,
        rolling_window: query.window,
        rolling,
        weekly,
    }
}
