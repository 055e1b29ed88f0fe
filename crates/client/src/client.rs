//! The client facade.
//!
//! [`MeteringClient`] ties the two caches to the transports: checks are
//! answered from the decision cache when possible, reports are folded
//! into the aggregation cache, and everything either cache flushes is
//! dispatched to the backend on a detached task. A shared periodic
//! timer drives both caches' sweeps.
//!
//! # Shutdown contract
//!
//! [`shutdown`](MeteringClient::shutdown) (1) disconnects both flush
//! callbacks, (2) stops the periodic timer, (3) drains both caches.
//! Because the callbacks are disconnected first, the final drain is
//! silent by design: nothing is sent for entries still cached at
//! shutdown. Callers that want the tail data delivered should call
//! [`flush_all`](MeteringClient::flush_all) *before* `shutdown`.
//!
//! In-flight transport completions may re-enter the caches after
//! `shutdown`; the caches are shared with those completions by `Arc`,
//! so the late `cache_response` writes land harmlessly in a drained
//! (but valid) cache.

use std::sync::Arc;

use metergate_types::{CheckRequest, CheckResponse, ReportRequest, ReportResponse};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::{
    aggregator::MetricKinds,
    check_cache::{CheckAggregator, CheckDecision},
    config::ClientOptions,
    error::{Error, Result},
    report_cache::ReportAggregator,
    stats::{Statistics, StatisticsSnapshot},
    timer::PeriodicTimer,
    transport::{CheckTransport, ReportTransport},
};

/// Caching, aggregating front end to the metering control service.
///
/// Cloneable handles are not provided; share the client with `Arc`.
/// All methods take `&self` and are safe to call concurrently from any
/// number of tasks.
///
/// Must be constructed inside a tokio runtime: flush dispatch and the
/// periodic flush timer run on spawned tasks.
pub struct MeteringClient {
    check_aggregator: Arc<CheckAggregator>,
    report_aggregator: Arc<ReportAggregator>,
    check_transport: Option<Arc<dyn CheckTransport>>,
    report_transport: Option<Arc<dyn ReportTransport>>,
    stats: Arc<Statistics>,
    flush_timer: Mutex<Option<Box<dyn PeriodicTimer>>>,
}

impl MeteringClient {
    /// Creates a client for `service_name` with the given options.
    ///
    /// Wires the caches' flush callbacks to the configured transports
    /// and, when a timer factory is available and either cache needs
    /// periodic flushing, starts one shared timer at the shorter of the
    /// two cache intervals.
    pub fn new(service_name: impl Into<String>, options: ClientOptions) -> Self {
        let service_name = service_name.into();
        let metric_kinds: MetricKinds = Arc::new(options.metric_kinds);
        let stats = Arc::new(Statistics::default());

        let check_aggregator = Arc::new(CheckAggregator::new(
            service_name.clone(),
            options.service_config_id.clone(),
            options.check_options,
            Arc::clone(&metric_kinds),
        ));
        let report_aggregator = Arc::new(ReportAggregator::new(
            service_name,
            options.service_config_id,
            options.report_options,
            metric_kinds,
        ));

        if let Some(transport) = options.check_transport.clone() {
            let flush_stats = Arc::clone(&stats);
            check_aggregator.set_flush_callback(Arc::new(move |request: CheckRequest| {
                Statistics::bump(&flush_stats.send_checks_by_flush);
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    // The response of a flush-initiated check is not
                    // cached; the data it carried is already accounted.
                    if let Err(err) = transport.check(&request).await {
                        error!(error = %err, "flush-initiated check call failed");
                    }
                });
            }));
        }
        if let Some(transport) = options.report_transport.clone() {
            let flush_stats = Arc::clone(&stats);
            report_aggregator.set_flush_callback(Arc::new(move |request: ReportRequest| {
                Statistics::bump(&flush_stats.send_reports_by_flush);
                Statistics::add(&flush_stats.send_report_operations, request.operations.len() as u64);
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    if let Err(err) = transport.report(&request).await {
                        error!(error = %err, "flush-initiated report call failed");
                    }
                });
            }));
        }

        let intervals = [
            check_aggregator.next_flush_interval(),
            report_aggregator.next_flush_interval(),
        ];
        let flush_interval = intervals.into_iter().flatten().min();

        let flush_timer = match (options.timer_factory, flush_interval) {
            (Some(factory), Some(interval)) => {
                debug!(interval_ms = interval.as_millis() as u64, "starting periodic flush timer");
                let check = Arc::clone(&check_aggregator);
                let report = Arc::clone(&report_aggregator);
                Some(factory(
                    interval,
                    Arc::new(move || {
                        check.flush();
                        report.flush();
                    }),
                ))
            },
            _ => None,
        };

        Self {
            check_aggregator,
            report_aggregator,
            check_transport: options.check_transport,
            report_transport: options.report_transport,
            stats,
            flush_timer: Mutex::new(flush_timer),
        }
    }

    /// Performs an admission check through the cache.
    ///
    /// A cache hit completes without touching the network. On a miss
    /// (or a stale entry due for refresh) the configured transport is
    /// awaited and its successful response is cached before being
    /// returned; transport failures are forwarded unchanged and cache
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a wrong service name, a missing
    /// operation, or no configured check transport; any transport error
    /// otherwise.
    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResponse> {
        let transport = self.check_transport.clone();
        match transport {
            Some(transport) => self.check_with_transport(request, transport.as_ref()).await,
            None => {
                Statistics::bump(&self.stats.total_called_checks);
                Err(Error::invalid_argument("no check transport configured"))
            },
        }
    }

    /// [`check`](Self::check) with a per-call transport, for callers
    /// that thread call-scoped context (deadlines, credentials) into
    /// their transport.
    pub async fn check_with_transport(
        &self,
        request: &CheckRequest,
        transport: &dyn CheckTransport,
    ) -> Result<CheckResponse> {
        Statistics::bump(&self.stats.total_called_checks);

        match self.check_aggregator.check(request)? {
            CheckDecision::Cached(response) => Ok(response),
            CheckDecision::MustQuery => {
                Statistics::bump(&self.stats.send_checks_in_flight);
                let response = transport.check(request).await?;
                self.check_aggregator.cache_response(request, response.clone());
                Ok(response)
            },
        }
    }

    /// Submits a usage report through the aggregation cache.
    ///
    /// Low-importance reports are folded into the cache and complete
    /// immediately with an empty response; the backend sees the data on
    /// a later flush. High-importance reports (and everything when the
    /// cache is disabled) go straight to the transport.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a wrong service name or no
    /// configured report transport; any transport error otherwise.
    pub async fn report(&self, request: &ReportRequest) -> Result<ReportResponse> {
        let transport = self.report_transport.clone();
        match transport {
            Some(transport) => self.report_with_transport(request, transport.as_ref()).await,
            None => {
                Statistics::bump(&self.stats.total_called_reports);
                Err(Error::invalid_argument("no report transport configured"))
            },
        }
    }

    /// [`report`](Self::report) with a per-call transport.
    pub async fn report_with_transport(
        &self,
        request: &ReportRequest,
        transport: &dyn ReportTransport,
    ) -> Result<ReportResponse> {
        use crate::report_cache::ReportDisposition;

        Statistics::bump(&self.stats.total_called_reports);

        match self.report_aggregator.report(request)? {
            ReportDisposition::Aggregated => Ok(ReportResponse::default()),
            ReportDisposition::PassThrough => {
                Statistics::bump(&self.stats.send_reports_in_flight);
                Statistics::add(
                    &self.stats.send_report_operations,
                    request.operations.len() as u64,
                );
                transport.report(request).await
            },
        }
    }

    /// Runs one flush sweep on both caches, as the periodic timer does.
    pub fn flush(&self) {
        self.check_aggregator.flush();
        self.report_aggregator.flush();
    }

    /// Drains both caches completely, sending everything pending
    /// through the flush callbacks.
    pub fn flush_all(&self) {
        self.check_aggregator.flush_all();
        self.report_aggregator.flush_all();
    }

    /// The interval the periodic flush timer runs at, or `None` when
    /// both caches are disabled.
    #[must_use]
    pub fn next_flush_interval(&self) -> Option<std::time::Duration> {
        [
            self.check_aggregator.next_flush_interval(),
            self.report_aggregator.next_flush_interval(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// A lock-free snapshot of the client counters.
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Shuts the client down: disconnects the flush callbacks, stops
    /// the periodic timer, then drains both caches.
    ///
    /// The drain is intentionally silent; see the module docs. Call
    /// [`flush_all`](Self::flush_all) first to deliver pending data.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.check_aggregator.clear_flush_callback();
        self.report_aggregator.clear_flush_callback();
        if let Some(timer) = self.flush_timer.lock().take() {
            timer.stop();
        }
        self.check_aggregator.flush_all();
        self.report_aggregator.flush_all();
    }
}

impl Drop for MeteringClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
