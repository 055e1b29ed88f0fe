//! Usage-report aggregation cache.
//!
//! Low-importance operations are folded into per-fingerprint
//! [`OperationAggregator`]s instead of being sent remotely one by one.
//! Entries leave the cache (and become outbound requests) when they
//! outlive the flush interval, when capacity evicts them, or when the
//! cache is drained at shutdown. Aging is measured from first
//! insertion, not last merge, so a hot fingerprint cannot postpone its
//! flush forever.
//!
//! Evictions produced by one sweep coalesce in the eviction buffer up
//! to [`MAX_OPERATIONS_PER_REPORT`] operations per outbound request.

use metergate_types::{Importance, ReportRequest};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    aggregator::{MetricKinds, OperationAggregator},
    config::ReportAggregationOptions,
    error::{Error, Result},
    fingerprint::{Fingerprint, operation_fingerprint},
    lru::LruCache,
    outlet::{EvictionBuffer, FlushCallback, FlushOutlet},
};

/// Maximum operations carried by one merged outbound report request.
///
/// An operation is a few kilobytes on the wire and the backend caps
/// request size at one megabyte, so merged flushes stop well short of
/// that.
pub const MAX_OPERATIONS_PER_REPORT: usize = 100;

/// Outcome of offering a report to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    /// Every operation was folded into the cache; nothing to send now.
    Aggregated,
    /// Not cacheable (high importance or cache disabled): the caller
    /// must send the original request to the backend.
    PassThrough,
}

/// Aggregating layer for usage reports.
///
/// Thread safe; the cache mutex is held only for LRU mutation, never
/// across the flush callback.
pub(crate) struct ReportAggregator {
    service_name: String,
    service_config_id: String,
    options: ReportAggregationOptions,
    metric_kinds: MetricKinds,
    /// `None` when aggregation is disabled (`num_entries == 0`).
    cache: Mutex<Option<LruCache<Fingerprint, OperationAggregator>>>,
    outlet: FlushOutlet<ReportRequest>,
}

impl ReportAggregator {
    pub(crate) fn new(
        service_name: impl Into<String>,
        service_config_id: impl Into<String>,
        options: ReportAggregationOptions,
        metric_kinds: MetricKinds,
    ) -> Self {
        let cache = options.enabled().then(|| {
            LruCache::new(options.num_entries()).with_max_age(options.flush_interval())
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

    /// Installs the callback receiving flushed report requests.
    pub(crate) fn set_flush_callback(&self, callback: FlushCallback<ReportRequest>) {
        self.outlet.set_callback(callback);
    }

    /// Disconnects the flush callback; later evictions are dropped.
    pub(crate) fn clear_flush_callback(&self) {
        self.outlet.clear_callback();
    }

    /// Offers a report to the cache.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the request names a different
    /// service.
    pub(crate) fn report(&self, request: &ReportRequest) -> Result<ReportDisposition> {
        if request.service_name != self.service_name {
            return Err(Error::invalid_argument(format!(
                "invalid service name: {} expecting: {}",
                request.service_name, self.service_name,
            )));
        }
        if request.operations.iter().any(|op| op.importance != Importance::Low) {
            return Ok(ReportDisposition::PassThrough);
        }

        let mut buffer = EvictionBuffer::new();
        {
            let mut guard = self.cache.lock();
            let Some(cache) = guard.as_mut() else {
                return Ok(ReportDisposition::PassThrough);
            };

            for operation in &request.operations {
                let fingerprint = operation_fingerprint(operation);
                match cache.get_mut(&fingerprint) {
                    Some(aggregator) => aggregator.merge_operation(operation),
                    None => {
                        let aggregator = OperationAggregator::new(
                            operation,
                            MetricKinds::clone(&self.metric_kinds),
                        );
                        cache.insert(fingerprint, aggregator, &mut self.drain_into(&mut buffer));
                    },
                }
            }
        }
        buffer.flush_through(&self.outlet);
        Ok(ReportDisposition::Aggregated)
    }

    /// Sweeps entries older than the flush interval.
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

    /// Evicts every entry, flushing all aggregated operations.
    pub(crate) fn flush_all(&self) {
        let mut buffer = EvictionBuffer::new();
        {
            let mut guard = self.cache.lock();
            if let Some(cache) = guard.as_mut() {
                debug!(entries = cache.len(), "removing all report cache entries");
                cache.remove_all(&mut self.drain_into(&mut buffer));
            }
        }
        buffer.flush_through(&self.outlet);
    }

    /// When the periodic flush should run for this cache, or `None`
    /// when aggregation is disabled.
    pub(crate) fn next_flush_interval(&self) -> Option<std::time::Duration> {
        self.options.enabled().then(|| self.options.flush_interval())
    }

    /// Builds the eviction hook: wrap each evicted aggregator in an
    /// outbound request and offer it to the buffer, which merges
    /// adjacent requests up to [`MAX_OPERATIONS_PER_REPORT`] operations.
    fn drain_into<'a>(
        &'a self,
        buffer: &'a mut EvictionBuffer<ReportRequest>,
    ) -> impl FnMut(OperationAggregator) + 'a {
        move |aggregator| {
            let request = ReportRequest {
                service_name: self.service_name.clone(),
                service_config_id: self.service_config_id.clone(),
                operations: vec![aggregator.to_operation()],
            };
            buffer.push(request, merge_outbound);
        }
    }
}

/// Buffer merge predicate: absorb `item` into `tail` when the service
/// matches and the combined request stays within the operation cap.
fn merge_outbound(tail: &mut ReportRequest, item: &ReportRequest) -> bool {
    if tail.service_name != item.service_name
        || tail.operations.len() + item.operations.len() > MAX_OPERATIONS_PER_REPORT
    {
        return false;
    }
    tail.operations.extend(item.operations.iter().cloned());
    true
}
