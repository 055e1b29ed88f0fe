//! Client configuration.
//!
//! Aggregation behavior is tuned per cache with
//! [`CheckAggregationOptions`] and [`ReportAggregationOptions`];
//! [`ClientOptions`] bundles them with the transports, the metric-kind
//! table, and the periodic timer factory.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use metergate_client::{
//!     CheckAggregationOptions, ClientOptions, ReportAggregationOptions,
//! };
//! # use metergate_client::{CheckTransport, ReportTransport};
//!
//! # fn example(check: Arc<dyn CheckTransport>, report: Arc<dyn ReportTransport>) {
//! let options = ClientOptions::builder()
//!     .check_options(
//!         CheckAggregationOptions::builder()
//!             .num_entries(10_000)
//!             .flush_interval(Duration::from_millis(500))
//!             .expiration(Duration::from_secs(1))
//!             .build(),
//!     )
//!     .report_options(
//!         ReportAggregationOptions::builder().flush_interval(Duration::from_secs(1)).build(),
//!     )
//!     .check_transport(check)
//!     .report_transport(report)
//!     .build();
//! # }
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use metergate_types::MetricKind;

use crate::{
    timer::TimerFactory,
    transport::{CheckTransport, ReportTransport},
};

/// Default maximum entries for both caches.
const DEFAULT_NUM_ENTRIES: usize = 10_000;

/// Default check refresh interval.
const DEFAULT_CHECK_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Default check response expiration.
const DEFAULT_CHECK_EXPIRATION: Duration = Duration::from_millis(1000);

/// Default report flush interval.
const DEFAULT_REPORT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Options controlling admission-check caching.
#[derive(Debug, Clone)]
pub struct CheckAggregationOptions {
    num_entries: usize,
    flush_interval: Duration,
    expiration: Duration,
}

impl Default for CheckAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: DEFAULT_NUM_ENTRIES,
            flush_interval: DEFAULT_CHECK_FLUSH_INTERVAL,
            expiration: DEFAULT_CHECK_EXPIRATION,
        }
    }
}

#[bon::bon]
impl CheckAggregationOptions {
    /// Creates check aggregation options.
    ///
    /// `num_entries` is the cache capacity (`0` disables caching),
    /// `flush_interval` the age at which a cached response must be
    /// refreshed, and `expiration` the idle window after which an
    /// unused entry is discarded. `expiration` is clamped up to
    /// `flush_interval + 1ms`: a cached response must outlive at least
    /// one refresh attempt, otherwise entries would expire before they
    /// could ever be refreshed.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_NUM_ENTRIES)] num_entries: usize,
        #[builder(default = DEFAULT_CHECK_FLUSH_INTERVAL)] flush_interval: Duration,
        #[builder(default = DEFAULT_CHECK_EXPIRATION)] expiration: Duration,
    ) -> Self {
        let floor = flush_interval + Duration::from_millis(1);
        Self { num_entries, flush_interval, expiration: expiration.max(floor) }
    }

    /// Creates options with caching disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self { num_entries: 0, ..Self::default() }
    }

    /// Maximum number of cache entries; zero means disabled.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Whether caching is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.num_entries > 0
    }

    /// Age at which a cached response must be refreshed.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Idle window after which an unused entry is discarded.
    #[must_use]
    pub fn expiration(&self) -> Duration {
        self.expiration
    }
}

/// Options controlling usage-report aggregation.
#[derive(Debug, Clone)]
pub struct ReportAggregationOptions {
    num_entries: usize,
    flush_interval: Duration,
}

impl Default for ReportAggregationOptions {
    fn default() -> Self {
        Self { num_entries: DEFAULT_NUM_ENTRIES, flush_interval: DEFAULT_REPORT_FLUSH_INTERVAL }
    }
}

#[bon::bon]
impl ReportAggregationOptions {
    /// Creates report aggregation options.
    ///
    /// `num_entries` is the cache capacity (`0` disables aggregation)
    /// and `flush_interval` the age at which an aggregated report is
    /// flushed to the backend.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_NUM_ENTRIES)] num_entries: usize,
        #[builder(default = DEFAULT_REPORT_FLUSH_INTERVAL)] flush_interval: Duration,
    ) -> Self {
        Self { num_entries, flush_interval }
    }

    /// Creates options with aggregation disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self { num_entries: 0, ..Self::default() }
    }

    /// Maximum number of cache entries; zero means disabled.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Whether aggregation is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.num_entries > 0
    }

    /// Age at which an aggregated report is flushed.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

/// Everything needed to construct a
/// [`MeteringClient`](crate::MeteringClient).
pub struct ClientOptions {
    pub(crate) check_options: CheckAggregationOptions,
    pub(crate) report_options: ReportAggregationOptions,
    pub(crate) metric_kinds: HashMap<String, MetricKind>,
    pub(crate) service_config_id: String,
    pub(crate) check_transport: Option<Arc<dyn CheckTransport>>,
    pub(crate) report_transport: Option<Arc<dyn ReportTransport>>,
    pub(crate) timer_factory: Option<TimerFactory>,
}

impl ClientOptions {
    /// Starts building client options.
    #[must_use]
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder {
            check_options: CheckAggregationOptions::default(),
            report_options: ReportAggregationOptions::default(),
            metric_kinds: HashMap::new(),
            service_config_id: String::new(),
            check_transport: None,
            report_transport: None,
            timer_factory: Some(crate::timer::tokio_timer_factory()),
        }
    }
}

/// Builder for [`ClientOptions`].
///
/// Hand-rolled (rather than derived) because several fields are trait
/// objects.
pub struct ClientOptionsBuilder {
    check_options: CheckAggregationOptions,
    report_options: ReportAggregationOptions,
    metric_kinds: HashMap<String, MetricKind>,
    service_config_id: String,
    check_transport: Option<Arc<dyn CheckTransport>>,
    report_transport: Option<Arc<dyn ReportTransport>>,
    timer_factory: Option<TimerFactory>,
}

impl ClientOptionsBuilder {
    /// Sets the service configuration revision stamped onto outbound
    /// requests materialized from evicted cache entries.
    #[must_use]
    pub fn service_config_id(mut self, service_config_id: impl Into<String>) -> Self {
        self.service_config_id = service_config_id.into();
        self
    }

    /// Sets the check aggregation options.
    #[must_use]
    pub fn check_options(mut self, options: CheckAggregationOptions) -> Self {
        self.check_options = options;
        self
    }

    /// Sets the report aggregation options.
    #[must_use]
    pub fn report_options(mut self, options: ReportAggregationOptions) -> Self {
        self.report_options = options;
        self
    }

    /// Sets the metric-kind table; metrics not listed default to
    /// [`MetricKind::Delta`].
    #[must_use]
    pub fn metric_kinds(mut self, metric_kinds: HashMap<String, MetricKind>) -> Self {
        self.metric_kinds = metric_kinds;
        self
    }

    /// Sets the transport used for admission checks.
    #[must_use]
    pub fn check_transport(mut self, transport: Arc<dyn CheckTransport>) -> Self {
        self.check_transport = Some(transport);
        self
    }

    /// Sets the transport used for usage reports.
    #[must_use]
    pub fn report_transport(mut self, transport: Arc<dyn ReportTransport>) -> Self {
        self.report_transport = Some(transport);
        self
    }

    /// Replaces the periodic timer factory.
    ///
    /// Defaults to a tokio-interval-based factory.
    #[must_use]
    pub fn timer_factory(mut self, factory: TimerFactory) -> Self {
        self.timer_factory = Some(factory);
        self
    }

    /// Disables periodic flushing; `flush` must then be driven by the
    /// caller. Useful in tests that want full control of time.
    #[must_use]
    pub fn no_periodic_flush(mut self) -> Self {
        self.timer_factory = None;
        self
    }

    /// Finalizes the options.
    #[must_use]
    pub fn build(self) -> ClientOptions {
        ClientOptions {
            check_options: self.check_options,
            report_options: self.report_options,
            metric_kinds: self.metric_kinds,
            service_config_id: self.service_config_id,
            check_transport: self.check_transport,
            report_transport: self.report_transport,
            timer_factory: self.timer_factory,
        }
    }
}
