use crate::cache::CacheStats;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::service::{AnalyticsDataService, ServiceState};
use crate::source::DailySeriesSource;
use crate::types::{
    AggregateResult, AnalyticsQuery, DateRange, Granularity, Metric, WeekAlignment,
};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query string of `GET /v1/analytics/traffic`.
#[derive(Debug, Deserialize)]
pub struct TrafficParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Comma separated, defaults to `views,visitors`.
    pub metrics: Option<String>,
    pub granularity: Option<Granularity>,
    pub alignment: Option<WeekAlignment>,
    pub window: Option<usize>,
}

impl TrafficParams {
    pub fn into_query(self, default_window: usize) -> AnalyticsResult<AnalyticsQuery> {
        let metrics = match self.metrics.as_deref() {
            None => vec![Metric::Views, Metric::Visitors],
            Some(raw) => raw
                .split(',')
                .filter(|m| !m.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<Metric>, AnalyticsError>>()?,
        };
        let query = AnalyticsQuery {
            range: DateRange::new(self.start, self.end),
            metrics,
            granularity: self.granularity.unwrap_or_default(),
            alignment: self.alignment.unwrap_or_default(),
            window: self.window.unwrap_or(default_window),
        };
        query.validate()?;
        Ok(query)
    }
}

/// GET /v1/analytics/traffic
pub async fn traffic<S: DailySeriesSource>(
    State(service): State<Arc<AnalyticsDataService<S>>>,
    Query(params): Query<TrafficParams>,
) -> AnalyticsResult<Json<Arc<AggregateResult>>> {
    let query = params.into_query(service.config().default_window)?;
    let result = service.get(&query).await?;
    Ok(Json(result))
}

/// GET /v1/analytics/cache
pub async fn cache_stats<S: DailySeriesSource>(
    State(service): State<Arc<AnalyticsDataService<S>>>,
) -> Json<CacheStats> {
    Json(service.cache_stats())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_entries: usize,
    pub cache_capacity: usize,
}

/// GET /health
pub async fn health<S: DailySeriesSource>(
    State(service): State<Arc<AnalyticsDataService<S>>>,
) -> Json<HealthResponse> {
    let status = match service.state() {
        ServiceState::Running => "ok",
        ServiceState::Created => "starting",
        ServiceState::Destroyed => "stopped",
    };
    Json(HealthResponse {
        status,
        cache_entries: service.cache_stats().size,
        cache_capacity: service.config().max_entries,
    })
}

pub fn router<S: DailySeriesSource>(service: Arc<AnalyticsDataService<S>>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/v1/analytics/traffic", get(traffic::<S>))
        .route("/v1/analytics/cache", get(cache_stats::<S>))
        .with_state(service)
}
