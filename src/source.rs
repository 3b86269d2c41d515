use crate::error::SourceError;
use crate::types::{DateRange, Metric, TimeSeriesPoint};
use std::future::Future;
use std::path::PathBuf;

/// Where daily traffic numbers come from.
///
/// Implementations return points ascending by date. An empty vec means
/// "no traffic recorded" and is not an error.
pub trait DailySeriesSource: Send + Sync + 'static {
    fn fetch_daily_series(
        &self,
        range: &DateRange,
        metrics: &[Metric],
    ) -> impl Future<Output = Result<Vec<TimeSeriesPoint>, SourceError>> + Send;
}

/// Reads a JSON array of daily points from disk on every fetch, so the file
/// can be rewritten by an exporter while the service runs.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DailySeriesSource for JsonFileSource {
    async fn fetch_daily_series(
        &self,
        range: &DateRange,
        _metrics: &[Metric],
    ) -> Result<Vec<TimeSeriesPoint>, SourceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "series file missing, treating as no data");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let points: Vec<TimeSeriesPoint> = serde_json::from_slice(&bytes)?;
        Ok(points
            .into_iter()
            .filter(|p| range.contains(p.date))
            .collect())
    }
}
