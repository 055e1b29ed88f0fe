//! Admission-decision cache.
//!
//! Caches the backend's verdict per request fingerprint and answers
//! repeat checks locally while the verdict is fresh. Low-importance
//! traffic admitted from the cache has its quota tokens accumulated
//! into a pending aggregator per entry, so the backend still sees every
//! token once the entry is refreshed or evicted.
//!
//! # Entry lifecycle
//!
//! ```text
//! check → MustQuery ──caller──▶ backend ──▶ cache_response ─▶ Fresh
//!
//! Fresh ──age ≥ flush_interval──▶ Stale
//! Stale ──next check──▶ MustQuery (refresh dispatched, entry keeps
//!                        serving the old verdict to later checks)
//! refresh response ──cache_response──▶ Fresh
//! any state ──idle ≥ expiration──▶ evicted by the flush sweep
//! ```
//!
//! Denied verdicts are sticky: every check inside the flush interval
//! gets the cached denial, and exactly one check per interval is told
//! to refresh. Denial entries accumulate nothing, since there is no
//! quota to account for a rejected request.

use std::time::Instant;

use metergate_types::{CheckRequest, CheckResponse, Importance, Operation};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    aggregator::{MetricKinds, OperationAggregator},
    config::CheckAggregationOptions,
    error::{Error, Result},
    fingerprint::{Fingerprint, check_request_fingerprint},
    lru::LruCache,
    outlet::{EvictionBuffer, FlushCallback, FlushOutlet},
};

/// Outcome of a cache lookup for one check request.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckDecision {
    /// The cached verdict answers the request; no remote call needed.
    Cached(CheckResponse),
    /// Not answerable from the cache: the caller must query the backend
    /// and hand the response back for caching.
    MustQuery,
}

/// One cached verdict plus the quota tokens accumulated against it.
struct CheckCacheEntry {
    response: CheckResponse,
    /// When the response was last (re)confirmed by the backend, or the
    /// moment a refresh was dispatched.
    last_refresh: Instant,
    /// Ratio of tokens granted to tokens requested in the last
    /// response; kept as a hint for future admission scaling.
    quota_scale: f64,
    /// A refresh has been dispatched and has not resolved yet.
    is_refreshing: bool,
    /// Tokens admitted from this entry since the last refresh.
    pending: Option<OperationAggregator>,
}

impl CheckCacheEntry {
    fn new(response: CheckResponse, now: Instant) -> Self {
        Self { response, last_refresh: now, quota_scale: 0.0, is_refreshing: false, pending: None }
    }

    /// Folds an admitted operation into the pending aggregator.
    fn aggregate(&mut self, operation: &Operation, metric_kinds: &MetricKinds) {
        match &mut self.pending {
            Some(aggregator) => aggregator.merge_operation(operation),
            None => {
                self.pending =
                    Some(OperationAggregator::new(operation, MetricKinds::clone(metric_kinds)));
            },
        }
    }

    /// Extracts the accumulated request, leaving the entry empty.
    ///
    /// Returns `None` when nothing was admitted from this entry since
    /// its last refresh.
    fn take_pending_request(
        &mut self,
        service_name: &str,
        service_config_id: &str,
    ) -> Option<CheckRequest> {
        let aggregator = self.pending.take()?;
        Some(CheckRequest {
            service_name: service_name.to_owned(),
            service_config_id: service_config_id.to_owned(),
            operation: Some(aggregator.to_operation()),
        })
    }
}

/// Caching layer for admission checks.
///
/// Thread safe; the cache mutex is held only for LRU mutation, never
/// across the flush callback.
pub(crate) struct CheckAggregator {
    service_name: String,
    service_config_id: String,
    options: CheckAggregationOptions,
    metric_kinds: MetricKinds,
    /// `None` when the cache is disabled (`num_entries == 0`).
    cache: Mutex<Option<LruCache<Fingerprint, CheckCacheEntry>>>,
    outlet: FlushOutlet<CheckRequest>,
}

impl CheckAggregator {
    pub(crate) fn new(
        service_name: impl Into<String>,
        service_config_id: impl Into<String>,
        options: CheckAggregationOptions,
        metric_kinds: MetricKinds,
    ) -> Self {
        let cache = options.enabled().then(|| {
            LruCache::new(options.num_entries()).with_max_idle(options.expiration())
        });
        Self {
            service_name: service_name.into(),
            service_config_id: service_config_id.into(),
            options,
            metric_kinds,
            cache: Mutex::new(cache),
            outlet: FlushOutlet::new(),
        }
    }

    /// Installs the callback receiving evicted pending requests.
    pub(crate) fn set_flush_callback(&self, callback: FlushCallback<CheckRequest>) {
        self.outlet.set_callback(callback);
    }

    /// Disconnects the flush callback; later evictions are dropped.
    pub(crate) fn clear_flush_callback(&self) {
        self.outlet.clear_callback();
    }

    /// Answers a check from the cache, or signals that the caller must
    /// query the backend.
    ///
    /// A stale pass still aggregates the incoming operation before
    /// returning [`CheckDecision::MustQuery`]: if the refresh then
    /// fails, the tokens stay in the entry and ride the next flush:
    /// accounting prefers late delivery over loss.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the request names a different
    /// service or carries no operation.
    pub(crate) fn check(&self, request: &CheckRequest) -> Result<CheckDecision> {
        if request.service_name != self.service_name {
            return Err(Error::invalid_argument(format!(
                "invalid service name: {} expecting: {}",
                request.service_name, self.service_name,
            )));
        }
        let Some(operation) = &request.operation else {
            return Err(Error::invalid_argument("operation field is required"));
        };
        if operation.importance != Importance::Low {
            return Ok(CheckDecision::MustQuery);
        }

        let fingerprint = check_request_fingerprint(request);
        let mut guard = self.cache.lock();
        let Some(cache) = guard.as_mut() else {
            return Ok(CheckDecision::MustQuery);
        };
        let Some(entry) = cache.get_mut(&fingerprint) else {
            return Ok(CheckDecision::MustQuery);
        };

        let now = Instant::now();
        let stale = now.duration_since(entry.last_refresh) >= self.options.flush_interval();

        if entry.response.is_denial() {
            // A denial accumulates nothing; after the flush interval a
            // single check is sent through to refresh the verdict while
            // the rest keep failing fast on the cached denial.
            if stale {
                entry.last_refresh = now;
                debug!(%fingerprint, "cached denial is stale; refreshing");
                Ok(CheckDecision::MustQuery)
            } else {
                Ok(CheckDecision::Cached(entry.response.clone()))
            }
        } else {
            entry.aggregate(operation, &self.metric_kinds);
            if stale {
                if entry.is_refreshing {
                    warn!(%fingerprint, "previous refresh has not completed yet");
                }
                entry.is_refreshing = true;
                entry.last_refresh = now;
                debug!(
                    %fingerprint,
                    quota_scale = entry.quota_scale,
                    "cached pass is stale; refreshing"
                );
                Ok(CheckDecision::MustQuery)
            } else {
                Ok(CheckDecision::Cached(entry.response.clone()))
            }
        }
    }

    /// Stores a backend response for the request's fingerprint.
    ///
    /// Inserting may evict the least-recently-used entry, whose pending
    /// tokens are then flushed through the callback.
    pub(crate) fn cache_response(&self, request: &CheckRequest, response: CheckResponse) {
        let mut buffer = EvictionBuffer::new();
        {
            let mut guard = self.cache.lock();
            let Some(cache) = guard.as_mut() else {
                return;
            };
            let fingerprint = check_request_fingerprint(request);
            let now = Instant::now();
            match cache.get_mut(&fingerprint) {
                Some(entry) => {
                    entry.response = response;
                    entry.last_refresh = now;
                    entry.quota_scale = 0.0;
                    entry.is_refreshing = false;
                },
                None => {
                    cache.insert(
                        fingerprint,
                        CheckCacheEntry::new(response, now),
                        &mut self.drain_into(&mut buffer),
                    );
                },
            }
        }
        buffer.flush_through(&self.outlet);
    }

    /// Sweeps entries idle longer than the expiration window.
    pub(crate) fn flush(&self) {
        let mut buffer = EvictionBuffer::new();
        {
            let mut guard = self.cache.lock();
            if let Some(cache) = guard.as_mut() {
                cache.remove_expired(&mut self.drain_into(&mut buffer));
            }
        }
        buffer.flush_through(&self.outlet);
    }

    /// Evicts every entry, flushing all pending tokens.
    pub(crate) fn flush_all(&self) {
        let mut buffer = EvictionBuffer::new();
        {
            let mut guard = self.cache.lock();
            if let Some(cache) = guard.as_mut() {
                debug!(entries = cache.len(), "removing all check cache entries");
                cache.remove_all(&mut self.drain_into(&mut buffer));
            }
        }
        buffer.flush_through(&self.outlet);
    }

    /// When the periodic flush should run for this cache, or `None`
    /// when the cache is disabled and never needs flushing.
    pub(crate) fn next_flush_interval(&self) -> Option<std::time::Duration> {
        self.options.enabled().then(|| self.options.expiration())
    }

    /// Builds the eviction hook: materialize each evicted entry's
    /// pending tokens into the buffer. Entries without pending tokens
    /// are dropped silently. Check requests never merge in the buffer.
    fn drain_into<'a>(
        &'a self,
        buffer: &'a mut EvictionBuffer<CheckRequest>,
    ) -> impl FnMut(CheckCacheEntry) + 'a {
        move |mut entry| {
            if let Some(request) =
                entry.take_pending_request(&self.service_name, &self.service_config_id)
            {
                buffer.push(request, |_, _| false);
            }
        }
    }
}
