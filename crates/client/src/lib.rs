//! Caching and aggregating client for the metering control service.
//!
//! Applications that meter traffic would otherwise pay one remote call
//! per request: an admission check before serving it and a usage report
//! after. This crate eliminates nearly all of that traffic while
//! keeping the backend's accounting correct:
//!
//! - **Checks** are answered from a decision cache keyed by request
//!   fingerprint. Cached verdicts are served until they go stale, one
//!   caller per interval is sent through to refresh them, and the quota
//!   tokens admitted from the cache are accumulated and delivered with
//!   the next refresh or eviction.
//! - **Reports** are folded into per-fingerprint aggregators (delta
//!   values summed, distributions merged bucket-wise, gauges replaced
//!   by the latest) and flushed as merged requests carrying up to 100
//!   operations each.
//!
//! # Architecture
//!
//! ```text
//!            ┌────────────────────────────────────────────────┐
//!            │                MeteringClient                  │
//!            │   counters · transport wiring · flush timer    │
//!            └──────┬──────────────────────────────┬──────────┘
//!                   │                              │
//!        ┌──────────▼─────────┐         ┌──────────▼──────────┐
//!        │   CheckAggregator  │         │  ReportAggregator   │
//!        │ fingerprint → last │         │ fingerprint →       │
//!        │ verdict + pending  │         │ OperationAggregator │
//!        │ quota tokens       │         │                     │
//!        └──────────┬─────────┘         └──────────┬──────────┘
//!                   │      LruCache + EvictionBuffer          │
//!                   └──────────────┬──────────────────────────┘
//!                                  │ flush callbacks (no cache
//!                                  ▼ lock held)
//!                      CheckTransport / ReportTransport
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use metergate_client::{ClientOptions, MeteringClient};
//! use metergate_types::{CheckRequest, Operation};
//! # use metergate_client::{CheckTransport, ReportTransport};
//!
//! # async fn example(
//! #     check_transport: Arc<dyn CheckTransport>,
//! #     report_transport: Arc<dyn ReportTransport>,
//! # ) -> Result<(), metergate_client::Error> {
//! let client = MeteringClient::new(
//!     "metering.example.com",
//!     ClientOptions::builder()
//!         .check_transport(check_transport)
//!         .report_transport(report_transport)
//!         .build(),
//! );
//!
//! let request = CheckRequest {
//!     service_name: "metering.example.com".into(),
//!     operation: Some(Operation::default()),
//!     ..CheckRequest::default()
//! };
//! let response = client.check(&request).await?;
//! if response.is_denial() {
//!     // reject the caller's request
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! The client may be called from any number of tasks. Each cache owns
//! one mutex, held only for map mutation; user flush callbacks are
//! never invoked under it (evicted items are buffered and delivered
//! after the lock is released), so callbacks are free to re-enter the
//! client. Transport completions may run inline or on any task.
//!
//! # What this crate does not do
//!
//! No wire protocol (transports are trait objects supplied by the
//! application), no retries of failed remote calls, no persistence of
//! cache contents, and no cross-process quota consistency: the backend
//! remains the source of truth.

#![deny(unsafe_code)]

mod aggregator;
mod check_cache;
mod client;
mod config;
mod error;
mod fingerprint;
mod lru;
mod outlet;
mod report_cache;
mod stats;
mod timer;
mod transport;

pub use client::MeteringClient;
pub use config::{
    CheckAggregationOptions, ClientOptions, ClientOptionsBuilder, ReportAggregationOptions,
};
pub use error::{BoxError, ConfigError, Error, Result};
pub use fingerprint::{
    Fingerprint, check_request_fingerprint, metric_value_fingerprint, operation_fingerprint,
};
pub use report_cache::MAX_OPERATIONS_PER_REPORT;
pub use stats::StatisticsSnapshot;
pub use timer::{PeriodicTimer, TickFn, TimerFactory, tokio_timer_factory};
pub use transport::{CheckTransport, ReportTransport};
