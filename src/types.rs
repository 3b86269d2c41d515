use crate::error::AnalyticsError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_ROLLING_WINDOW: usize = 7;
/// Longest range a single query may cover (two years of days).
pub const MAX_RANGE_DAYS: i64 = 731;
pub const MAX_ROLLING_WINDOW: usize = 90;

/// A traffic measure carried by daily points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Views,
    Visitors,
    BounceRate,
    AvgSessionSecs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Summed when rolled up (page views, visitors).
    Additive,
    /// Averaged over the days present when rolled up.
    Rate,
}

impl Metric {
    pub fn kind(self) -> MetricKind {
        match self {
            Metric::Views | Metric::Visitors => MetricKind::Additive,
            Metric::BounceRate | Metric::AvgSessionSecs => MetricKind::Rate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Views => "views",
            Metric::Visitors => "visitors",
            Metric::BounceRate => "bounce_rate",
            Metric::AvgSessionSecs => "avg_session_secs",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "views" => Ok(Metric::Views),
            "visitors" => Ok(Metric::Visitors),
            "bounce_rate" => Ok(Metric::BounceRate),
            "avg_session_secs" => Ok(Metric::AvgSessionSecs),
            other => Err(AnalyticsError::InvalidQuery(format!(
                "unknown metric: {other}"
            ))),
        }
    }
}

/// One day of traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub values: BTreeMap<Metric, f64>,
}

impl TimeSeriesPoint {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }
}

/// Inclusive range of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Whether the range reaches `today`, whose numbers are still moving.
    pub fn touches(&self, today: NaiveDate) -> bool {
        self.end >= today
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Daily,
    Weekly,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
        }
    }
}

/// How weekly buckets are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekAlignment {
    /// 7-day windows starting at the first point's date.
    #[default]
    Rolling,
    /// ISO weeks, Monday through Sunday.
    Calendar,
}

impl WeekAlignment {
    pub fn as_str(self) -> &'static str {
        match self {
            WeekAlignment::Rolling => "rolling",
            WeekAlignment::Calendar => "calendar",
        }
    }
}

/// Parameters of one analytics request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    pub range: DateRange,
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default)]
    pub alignment: WeekAlignment,
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_window() -> usize {
    DEFAULT_ROLLING_WINDOW
}

impl AnalyticsQuery {
    pub fn daily(range: DateRange, metrics: Vec<Metric>) -> Self {
        Self {
            range,
            metrics,
            granularity: Granularity::Daily,
            alignment: WeekAlignment::Rolling,
            window: DEFAULT_ROLLING_WINDOW,
        }
    }

    pub fn weekly(range: DateRange, metrics: Vec<Metric>, alignment: WeekAlignment) -> Self {
        Self {
            granularity: Granularity::Weekly,
            alignment,
            ..Self::daily(range, metrics)
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Sorted, de-duplicated metric set.
    pub fn normalized_metrics(&self) -> Vec<Metric> {
        let mut metrics = self.metrics.clone();
        metrics.sort();
        metrics.dedup();
        metrics
    }

    /// Reject queries that could only produce meaningless numbers.
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if self.range.start > self.range.end {
            return Err(AnalyticsError::InvalidQuery(format!(
                "range start {} is after end {}",
                self.range.start, self.range.end
            )));
        }
        if self.range.num_days() > MAX_RANGE_DAYS {
            return Err(AnalyticsError::InvalidQuery(format!(
                "range spans {} days, limit is {MAX_RANGE_DAYS}",
                self.range.num_days()
            )));
        }
        if self.metrics.is_empty() {
            return Err(AnalyticsError::InvalidQuery(
                "at least one metric is required".to_string(),
            ));
        }
        if self.window == 0 || self.window > MAX_ROLLING_WINDOW {
            return Err(AnalyticsError::InvalidQuery(format!(
                "window must be between 1 and {MAX_ROLLING_WINDOW}"
            )));
        }
        Ok(())
    }

    /// Stable cache key. Metric order and duplicates do not affect it.
    /// The alignment only matters for weekly queries.
    pub fn cache_key(&self) -> String {
        let metrics: Vec<&str> = self
            .normalized_metrics()
            .into_iter()
            .map(Metric::as_str)
            .collect();
        let alignment = match self.granularity {
            Granularity::Daily => "-",
            Granularity::Weekly => self.alignment.as_str(),
        };
        format!(
            "traffic:{}:{}:{}:{}:{}:{}",
            self.range.start,
            self.range.end,
            self.granularity.as_str(),
            alignment,
            self.window,
            metrics.join(","),
        )
    }
}

/// One roll-up bucket. `start`/`end` are the nominal bounds of the bucket;
/// `days` is how many daily points actually fell inside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyPoint {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: usize,
    pub values: BTreeMap<Metric, f64>,
}

/// Everything computed for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub range: DateRange,
    pub daily: Vec<TimeSeriesPoint>,
    pub rolling_window: usize,
    /// Per metric, aligned index-for-index with `daily`.
    pub rolling: BTreeMap<Metric, Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<Vec<WeeklyPoint>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn range() -> DateRange {
        DateRange::new(day(2024, 3, 1), day(2024, 3, 31))
    }

    #[test]
    fn test_cache_key_deterministic() {
        let q1 = AnalyticsQuery::daily(range(), vec![Metric::Views, Metric::Visitors]);
        let q2 = AnalyticsQuery::daily(range(), vec![Metric::Views, Metric::Visitors]);
        assert_eq!(q1.cache_key(), q2.cache_key());
        assert_eq!(
            q1.cache_key(),
            "traffic:2024-03-01:2024-03-31:daily:-:7:views,visitors"
        );
    }

    #[test]
    fn test_cache_key_ignores_metric_order_and_duplicates() {
        let q1 = AnalyticsQuery::daily(range(), vec![Metric::Visitors, Metric::Views]);
        let q2 = AnalyticsQuery::daily(
            range(),
            vec![Metric::Views, Metric::Visitors, Metric::Views],
        );
        assert_eq!(q1.cache_key(), q2.cache_key());
    }

    #[test]
    fn test_cache_key_distinguishes_parameters() {
        let base = AnalyticsQuery::daily(range(), vec![Metric::Views]);
        let weekly = AnalyticsQuery::weekly(range(), vec![Metric::Views], WeekAlignment::Rolling);
        let calendar =
            AnalyticsQuery::weekly(range(), vec![Metric::Views], WeekAlignment::Calendar);
        let wide = base.clone().with_window(14);
        let keys = [
            base.cache_key(),
            weekly.cache_key(),
            calendar.cache_key(),
            wide.cache_key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_queries() {
        let inverted = AnalyticsQuery::daily(
            DateRange::new(day(2024, 3, 2), day(2024, 3, 1)),
            vec![Metric::Views],
        );
        assert!(matches!(
            inverted.validate(),
            Err(AnalyticsError::InvalidQuery(_))
        ));

        let no_metrics = AnalyticsQuery::daily(range(), vec![]);
        assert!(no_metrics.validate().is_err());

        let zero_window = AnalyticsQuery::daily(range(), vec![Metric::Views]).with_window(0);
        assert!(zero_window.validate().is_err());

        let too_long = AnalyticsQuery::daily(
            DateRange::new(day(2020, 1, 1), day(2024, 1, 1)),
            vec![Metric::Views],
        );
        assert!(too_long.validate().is_err());

        let ok = AnalyticsQuery::daily(range(), vec![Metric::Views]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("views".parse::<Metric>().unwrap(), Metric::Views);
        assert_eq!(" bounce_rate ".parse::<Metric>().unwrap(), Metric::BounceRate);
        assert!("clicks".parse::<Metric>().is_err());
    }

    #[test]
    fn test_range_touches_today() {
        let r = range();
        assert!(r.touches(day(2024, 3, 31)));
        assert!(r.touches(day(2024, 3, 15)));
        assert!(!r.touches(day(2024, 4, 1)));
        assert_eq!(r.num_days(), 31);
    }
}
