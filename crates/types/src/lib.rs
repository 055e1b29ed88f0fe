//! Wire-level data model and value arithmetic for the metergate client.
//!
//! This crate defines the messages exchanged with the metering control
//! service and the pure arithmetic the aggregation engine performs on
//! metric values. It has no I/O and no locking; everything here is a
//! plain value type or a total function over one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     metergate-client                        │
//! │      (caches, aggregators, transport dispatch, facade)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     metergate-types                         │
//! │                                                             │
//! │  messages   CheckRequest / CheckResponse                    │
//! │             ReportRequest / ReportResponse                  │
//! │  operation  Operation, MetricValueSet, MetricValue, Value   │
//! │  money      currency-safe saturating addition               │
//! │  distribution  bucketed samples, Welford stats, merging     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Metric kinds
//!
//! Two metric values under the same identity combine according to their
//! [`MetricKind`]:
//!
//! | Kind         | Combination                                   |
//! |--------------|-----------------------------------------------|
//! | `Delta`      | values are added (bucket-wise for histograms) |
//! | `Cumulative` | the value with the latest end time wins       |
//! | `Gauge`      | the value with the latest end time wins       |
//!
//! The combination itself lives in `metergate-client`; this crate only
//! supplies the per-value arithmetic (`Money` addition, `Distribution`
//! merging) it is built from.

#![deny(unsafe_code)]

pub mod distribution;
pub mod error;
pub mod messages;
pub mod money;
pub mod operation;

pub use distribution::{BucketScheme, Distribution};
pub use error::{DistributionError, MoneyError};
pub use messages::{
    CheckError, CheckErrorCode, CheckRequest, CheckResponse, ReportError, ReportRequest,
    ReportResponse,
};
pub use money::Money;
pub use operation::{
    Importance, LogEntry, MetricKind, MetricValue, MetricValueSet, Operation, Value,
};
