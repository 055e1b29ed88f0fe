//! Operations and the metric values they carry.
//!
//! An [`Operation`] is the unit of accounting: one named action by one
//! consumer, carrying metric values and log entries for the time span
//! it covers. Operations are immutable once handed to the client; all
//! mutation happens on aggregator-owned copies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{distribution::Distribution, money::Money};

/// How urgently an operation must reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Importance {
    /// May be cached and aggregated before being sent.
    #[default]
    Low,
    /// Must be sent to the backend individually, bypassing all caches.
    High,
}

/// How two metric values under the same identity combine.
///
/// Configured per metric name; a metric absent from the configuration
/// table is treated as `Delta`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Values describe disjoint intervals and are added together.
    #[default]
    Delta,
    /// Values describe a running total; the latest end time wins.
    Cumulative,
    /// Values describe a point-in-time measurement; the latest end time
    /// wins.
    Gauge,
}

/// A log line attached to an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Name of the log this entry belongs to.
    pub name: String,
    /// When the logged event occurred.
    pub timestamp: Option<DateTime<Utc>>,
    /// Severity label, e.g. `"INFO"`.
    pub severity: String,
    /// The log payload.
    pub text_payload: String,
}

/// The payload of a [`MetricValue`], tagged by variant.
///
/// Values of different variants never merge with each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A signed integer count.
    Int64(i64),
    /// A floating-point quantity.
    Double(f64),
    /// A currency amount.
    Money(Money),
    /// A bucketed sample distribution.
    Distribution(Distribution),
}

/// One measured value of a metric, qualified by labels and a time span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Labels distinguishing this value from others of the same metric.
    pub labels: BTreeMap<String, String>,
    /// Start of the time span this value covers.
    pub start_time: Option<DateTime<Utc>>,
    /// End of the time span this value covers.
    pub end_time: Option<DateTime<Utc>>,
    /// The measured payload.
    pub value: Value,
}

impl MetricValue {
    /// Creates an unlabeled value with no time span.
    pub fn new(value: Value) -> Self {
        Self { labels: BTreeMap::new(), start_time: None, end_time: None, value }
    }
}

/// All values reported for one metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValueSet {
    /// The metric these values belong to.
    pub metric_name: String,
    /// The reported values.
    pub metric_values: Vec<MetricValue>,
}

/// One accountable action performed on behalf of a consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Caller-assigned identifier, unique per operation.
    pub operation_id: String,
    /// The name of the action, e.g. an RPC method.
    pub operation_name: String,
    /// Identity of the consumer being accounted, e.g. a project id.
    pub consumer_id: String,
    /// Labels describing where and how the operation ran.
    pub labels: BTreeMap<String, String>,
    /// Start of the operation's time span.
    pub start_time: Option<DateTime<Utc>>,
    /// End of the operation's time span.
    pub end_time: Option<DateTime<Utc>>,
    /// Whether the operation may be cached and aggregated.
    pub importance: Importance,
    /// Metric values measured for this operation.
    pub metric_value_sets: Vec<MetricValueSet>,
    /// Log entries produced by this operation.
    pub log_entries: Vec<LogEntry>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_low_and_delta() {
        assert_eq!(Importance::default(), Importance::Low);
        assert_eq!(MetricKind::default(), MetricKind::Delta);
    }

    #[test]
    fn labels_iterate_in_key_order() {
        let mut labels = BTreeMap::new();
        labels.insert("zone".to_owned(), "eu-1".to_owned());
        labels.insert("api".to_owned(), "list".to_owned());
        labels.insert("proto".to_owned(), "grpc".to_owned());
        let keys: Vec<&str> = labels.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["api", "proto", "zone"]);
    }

    #[test]
    fn operation_round_trips_through_serde() {
        let op = Operation {
            operation_id: "op-1".into(),
            operation_name: "ListShelves".into(),
            consumer_id: "project:acme".into(),
            importance: Importance::High,
            metric_value_sets: vec![MetricValueSet {
                metric_name: "request_count".into(),
                metric_values: vec![MetricValue::new(Value::Int64(7))],
            }],
            ..Operation::default()
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
