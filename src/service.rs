use crate::aggregate::{build_result, validate_series};
use crate::cache::{BoundedTtlCache, CacheStats};
use crate::clock::SharedClock;
use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::source::DailySeriesSource;
use crate::types::{AggregateResult, AnalyticsQuery};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

type ResultCache = BoundedTtlCache<Arc<AggregateResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Destroyed,
}

struct Lifecycle {
    state: ServiceState,
    cleanup_task: Option<JoinHandle<()>>,
}

/// Serves aggregated traffic queries, computing on cache miss.
///
/// One instance is shared (behind an `Arc`) by every request handler. The
/// cache lock is never held while the source is being queried, so two
/// concurrent misses on the same key may both fetch; the later store wins.
pub struct AnalyticsDataService<S> {
    source: S,
    cache: Arc<ResultCache>,
    config: AnalyticsConfig,
    clock: SharedClock,
    shutdown: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: DailySeriesSource> AnalyticsDataService<S> {
    /// Build the service in the `Created` state. Nothing runs in the
    /// background until [`start`](Self::start) is called from inside a tokio
    /// runtime; until then `get` returns [`AnalyticsError::NotStarted`].
    ///
    /// A zero cleanup interval or fetch timeout is raised to 1 ms.
    pub fn new(source: S, mut config: AnalyticsConfig, clock: SharedClock) -> Self {
        config.cleanup_interval_ms = config.cleanup_interval_ms.max(1);
        config.fetch_timeout_ms = config.fetch_timeout_ms.max(1);

        let cache = BoundedTtlCache::new(
            config.max_entries,
            config.target_eviction_ratio,
            Arc::clone(&clock),
        );
        Self {
            source,
            cache: Arc::new(cache),
            config,
            clock,
            shutdown: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Created,
                cleanup_task: None,
            }),
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the periodic cleanup task. Must be called inside a tokio runtime.
    /// Calling it again while running does nothing.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != ServiceState::Created {
            return;
        }
        let every = self.config.cleanup_interval();
        lifecycle.cleanup_task = Some(tokio::spawn(cleanup_loop(
            Arc::clone(&self.cache),
            every,
            self.shutdown.clone(),
        )));
        lifecycle.state = ServiceState::Running;
        tracing::info!(
            max_entries = self.cache.max_entries(),
            cleanup_interval_ms = every.as_millis() as u64,
            "analytics service started"
        );
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle().state
    }

    fn ensure_running(&self) -> AnalyticsResult<()> {
        match self.state() {
            ServiceState::Running => Ok(()),
            ServiceState::Created => Err(AnalyticsError::NotStarted),
            ServiceState::Destroyed => Err(AnalyticsError::Destroyed),
        }
    }

    pub async fn get(&self, query: &AnalyticsQuery) -> AnalyticsResult<Arc<AggregateResult>> {
        self.get_with_cancel(query, &CancellationToken::new()).await
    }

    /// Like [`get`](Self::get), but gives up when `cancel` fires. A cancelled
    /// or failed fetch never stores anything.
    pub async fn get_with_cancel(
        &self,
        query: &AnalyticsQuery,
        cancel: &CancellationToken,
    ) -> AnalyticsResult<Arc<AggregateResult>> {
        self.ensure_running()?;
        query.validate()?;

        let key = query.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "analytics cache hit");
            return Ok(hit);
        }
        tracing::debug!(key = %key, "analytics cache miss");

        let metrics = query.normalized_metrics();
        let timeout = self.config.fetch_timeout();
        let fetch = time::timeout(
            timeout,
            self.source.fetch_daily_series(&query.range, &metrics),
        );

        let points = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnalyticsError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(AnalyticsError::Destroyed),
            fetched = fetch => match fetched {
                Ok(points) => points?,
                Err(_) => return Err(AnalyticsError::Timeout(timeout)),
            },
        };

        if let Err(e) = validate_series(&points, &metrics) {
            tracing::warn!(key = %key, error = %e, "source returned malformed series");
            return Err(e);
        }

        let days = points.len();
        let result = Arc::new(build_result(query, points));

        if cancel.is_cancelled() {
            return Err(AnalyticsError::Cancelled);
        }

        let ttl_ms = self.ttl_for(query);
        self.install(key.clone(), Arc::clone(&result), ttl_ms)?;
        tracing::debug!(key = %key, days, ttl_ms, "analytics result cached");

        Ok(result)
    }

    /// Store under the lifecycle lock so nothing lands in the cache once
    /// `destroy` has flipped the state.
    fn install(
        &self,
        key: String,
        result: Arc<AggregateResult>,
        ttl_ms: i64,
    ) -> AnalyticsResult<()> {
        let lifecycle = self.lifecycle();
        if lifecycle.state != ServiceState::Running {
            return Err(AnalyticsError::Destroyed);
        }
        self.cache.set(key, result, ttl_ms);
        Ok(())
    }

    /// Ranges that reach today get the short TTL since today's numbers are
    /// still changing.
    fn ttl_for(&self, query: &AnalyticsQuery) -> i64 {
        let today = chrono::DateTime::from_timestamp_millis(self.clock.now_ms())
            .map(|now| now.date_naive());
        match today {
            Some(today) if !query.range.touches(today) => self.config.default_ttl_ms,
            _ => self.config.today_ttl_ms,
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Run one cleanup sweep now. Returns the number of entries removed.
    pub fn run_cleanup(&self) -> usize {
        self.cache.cleanup()
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
        tracing::info!("analytics cache cleared");
    }

    /// Stop the cleanup task, wait for it to exit and drop all cached
    /// results. The service is unusable afterwards.
    pub async fn destroy(&self) {
        let task = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == ServiceState::Destroyed {
                tracing::warn!("analytics service destroyed more than once");
                return;
            }
            lifecycle.state = ServiceState::Destroyed;
            lifecycle.cleanup_task.take()
        };

        self.shutdown.cancel();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "analytics cleanup task ended abnormally");
            }
        }
        self.cache.clear();
        tracing::info!("analytics service destroyed");
    }
}

impl<S> Drop for AnalyticsDataService<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn cleanup_loop(cache: Arc<ResultCache>, every: Duration, shutdown: CancellationToken) {
    let mut interval = time::interval(every);
    interval.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("analytics cleanup loop shutting down");
                break;
            }
            _ = interval.tick() => {
                let removed = cache.cleanup();
                if removed > 0 {
                    tracing::info!(removed, remaining = cache.len(), "swept expired analytics results");
                }
            }
        }
    }
}
