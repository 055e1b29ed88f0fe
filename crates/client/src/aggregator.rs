//! Merging repeated operations into one.
//!
//! An [`OperationAggregator`] accumulates every operation sharing one
//! report fingerprint. The base operation keeps the identity, the
//! widest time span, and the concatenated log entries; metric values
//! are folded into per-identity accumulators keyed by
//! `(metric name, metric value fingerprint)` and combined according to
//! the metric's configured [`MetricKind`].
//!
//! Merge incompatibilities (mismatched value variants, incompatible
//! distribution bucket schemes, mixed currencies) are logged and
//! skipped rather than surfaced: telemetry aggregation must never break
//! the request flow it accounts for.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use metergate_types::{
    MetricKind, MetricValue, MetricValueSet, Operation, Value, money,
};
use tracing::warn;

use crate::fingerprint::{Fingerprint, metric_value_fingerprint};

/// Metric-kind lookup table, shared read-only across aggregators.
///
/// Metrics absent from the table default to [`MetricKind::Delta`].
pub type MetricKinds = Arc<HashMap<String, MetricKind>>;

/// Accumulator for all operations sharing one report fingerprint.
#[derive(Debug, Clone)]
pub(crate) struct OperationAggregator {
    /// The first operation seen, with its metric value sets moved into
    /// `metric_values`.
    base: Operation,
    /// metric name → value fingerprint → accumulated value.
    metric_values: BTreeMap<String, BTreeMap<Fingerprint, MetricValue>>,
    metric_kinds: MetricKinds,
}

impl OperationAggregator {
    /// Creates an aggregator seeded with `operation`.
    pub(crate) fn new(operation: &Operation, metric_kinds: MetricKinds) -> Self {
        let mut aggregator = Self {
            base: operation.clone(),
            metric_values: BTreeMap::new(),
            metric_kinds,
        };
        aggregator.merge_metric_value_sets(operation);
        aggregator.base.metric_value_sets.clear();
        aggregator
    }

    /// Folds another operation with the same fingerprint into this one.
    pub(crate) fn merge_operation(&mut self, operation: &Operation) {
        widen_start(&mut self.base.start_time, operation.start_time);
        widen_end(&mut self.base.end_time, operation.end_time);
        self.merge_metric_value_sets(operation);
        self.base.log_entries.extend(operation.log_entries.iter().cloned());
    }

    /// Reconstructs a wire operation carrying the accumulated values.
    pub(crate) fn to_operation(&self) -> Operation {
        let mut operation = self.base.clone();
        for (metric_name, values) in &self.metric_values {
            operation.metric_value_sets.push(MetricValueSet {
                metric_name: metric_name.clone(),
                metric_values: values.values().cloned().collect(),
            });
        }
        operation
    }

    fn merge_metric_value_sets(&mut self, operation: &Operation) {
        for set in &operation.metric_value_sets {
            let kind =
                self.metric_kinds.get(&set.metric_name).copied().unwrap_or(MetricKind::Delta);
            let accumulators = self.metric_values.entry(set.metric_name.clone()).or_default();

            for metric_value in &set.metric_values {
                let fingerprint = metric_value_fingerprint(metric_value);
                match accumulators.get_mut(&fingerprint) {
                    None => {
                        accumulators.insert(fingerprint, metric_value.clone());
                    },
                    Some(existing) => {
                        merge_metric_value(kind, &set.metric_name, metric_value, existing);
                    },
                }
            }
        }
    }
}

/// Merges `from` into `to` according to the metric kind.
fn merge_metric_value(kind: MetricKind, metric_name: &str, from: &MetricValue, to: &mut MetricValue) {
    match kind {
        MetricKind::Delta => merge_delta(metric_name, from, to),
        MetricKind::Cumulative | MetricKind::Gauge => {
            // Latest end time wins; an equal end time also replaces.
            if !end_time_before(from, to) {
                *to = from.clone();
            }
        },
    }
}

/// Delta merge: widen the time span to the union and add the payloads.
fn merge_delta(metric_name: &str, from: &MetricValue, to: &mut MetricValue) {
    if std::mem::discriminant(&from.value) != std::mem::discriminant(&to.value) {
        warn!(metric = metric_name, "metric value variants are not compatible; value dropped");
        return;
    }

    widen_start(&mut to.start_time, from.start_time);
    widen_end(&mut to.end_time, from.end_time);

    match (&from.value, &mut to.value) {
        (Value::Int64(from_v), Value::Int64(to_v)) => {
            *to_v = to_v.saturating_add(*from_v);
        },
        (Value::Double(from_v), Value::Double(to_v)) => {
            *to_v += from_v;
        },
        (Value::Distribution(from_d), Value::Distribution(to_d)) => {
            if let Err(error) = to_d.merge_from(from_d) {
                warn!(metric = metric_name, %error, "distribution merge skipped");
            }
        },
        (Value::Money(from_m), Value::Money(to_m)) => match money::try_add(to_m, from_m) {
            Ok(sum) => *to_m = sum,
            Err(metergate_types::MoneyError::Overflow { saturated, .. }) => {
                warn!(metric = metric_name, "money accumulator saturated");
                *to_m = saturated;
            },
            Err(error) => {
                warn!(metric = metric_name, %error, "money merge skipped");
            },
        },
        _ => unreachable!("variant equality checked above"),
    }
}

/// Whether `from` ends strictly before `to`. A missing end time sorts
/// earliest, so a timestamped value always replaces an untimed one.
fn end_time_before(from: &MetricValue, to: &MetricValue) -> bool {
    from.end_time < to.end_time
}

fn widen_start(target: &mut Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) {
    if let Some(incoming) = incoming {
        if target.map_or(true, |current| incoming < current) {
            *target = Some(incoming);
        }
    }
}

fn widen_end(target: &mut Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) {
    if let Some(incoming) = incoming {
        if target.map_or(true, |current| incoming > current) {
            *target = Some(incoming);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap as Map;

    use chrono::TimeZone;
    use metergate_types::{Distribution, Importance, LogEntry, Money};

    use super::*;

    fn kinds(pairs: &[(&str, MetricKind)]) -> MetricKinds {
        Arc::new(pairs.iter().map(|(name, kind)| ((*name).to_owned(), *kind)).collect())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn int_value(v: i64) -> MetricValue {
        MetricValue::new(Value::Int64(v))
    }

    fn operation_with(metric_name: &str, value: MetricValue) -> Operation {
        Operation {
            operation_name: "ListShelves".into(),
            consumer_id: "project:acme".into(),
            metric_value_sets: vec![MetricValueSet {
                metric_name: metric_name.into(),
                metric_values: vec![value],
            }],
            ..Operation::default()
        }
    }

    #[test]
    fn singleton_round_trips() {
        let mut op = operation_with("request_count", int_value(7));
        op.start_time = Some(at(10));
        op.end_time = Some(at(20));
        op.log_entries.push(LogEntry { text_payload: "hello".into(), ..LogEntry::default() });

        let aggregator = OperationAggregator::new(&op, kinds(&[]));
        let out = aggregator.to_operation();

        assert_eq!(out.operation_name, op.operation_name);
        assert_eq!(out.start_time, op.start_time);
        assert_eq!(out.end_time, op.end_time);
        assert_eq!(out.log_entries, op.log_entries);
        assert_eq!(out.metric_value_sets, op.metric_value_sets);
    }

    #[test]
    fn delta_int64_values_sum() {
        let mut aggregator =
            OperationAggregator::new(&operation_with("request_count", int_value(1)), kinds(&[]));
        for v in [2, 3, 4] {
            aggregator.merge_operation(&operation_with("request_count", int_value(v)));
        }
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets.len(), 1);
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(10));
    }

    #[test]
    fn delta_int64_saturates_instead_of_wrapping() {
        let mut aggregator = OperationAggregator::new(
            &operation_with("request_count", int_value(i64::MAX)),
            kinds(&[]),
        );
        aggregator.merge_operation(&operation_with("request_count", int_value(1)));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(i64::MAX));
    }

    #[test]
    fn delta_double_values_sum() {
        let double = |v: f64| MetricValue::new(Value::Double(v));
        let mut aggregator =
            OperationAggregator::new(&operation_with("latency", double(0.5)), kinds(&[]));
        aggregator.merge_operation(&operation_with("latency", double(1.25)));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Double(1.75));
    }

    #[test]
    fn delta_money_sums_and_saturates() {
        let money = |units| MetricValue::new(Value::Money(Money::new("USD", units, 0)));
        let mut aggregator =
            OperationAggregator::new(&operation_with("cost", money(3)), kinds(&[]));
        aggregator.merge_operation(&operation_with("cost", money(4)));
        let out = aggregator.to_operation();
        assert_eq!(
            out.metric_value_sets[0].metric_values[0].value,
            Value::Money(Money::new("USD", 7, 0)),
        );

        aggregator.merge_operation(&operation_with("cost", money(i64::MAX)));
        let out = aggregator.to_operation();
        assert_eq!(
            out.metric_value_sets[0].metric_values[0].value,
            Value::Money(Money::saturated_max("USD")),
        );
    }

    #[test]
    fn delta_money_with_different_currencies_never_shares_an_accumulator() {
        let usd = MetricValue::new(Value::Money(Money::new("USD", 1, 0)));
        let eur = MetricValue::new(Value::Money(Money::new("EUR", 2, 0)));
        let mut aggregator =
            OperationAggregator::new(&operation_with("cost", usd), kinds(&[]));
        aggregator.merge_operation(&operation_with("cost", eur));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values.len(), 2);
    }

    #[test]
    fn delta_distributions_merge_bucketwise() {
        let dist = |samples: &[f64]| {
            let mut d = Distribution::linear(3, 10.0, 0.0).unwrap();
            for v in samples {
                d.add_sample(*v);
            }
            MetricValue::new(Value::Distribution(d))
        };
        let mut aggregator =
            OperationAggregator::new(&operation_with("sizes", dist(&[5.0, 15.0])), kinds(&[]));
        aggregator.merge_operation(&operation_with("sizes", dist(&[25.0])));

        let out = aggregator.to_operation();
        let Value::Distribution(merged) = &out.metric_value_sets[0].metric_values[0].value else {
            panic!("expected a distribution");
        };
        assert_eq!(merged.count, 3);
        assert_eq!(merged.bucket_counts, vec![0, 1, 1, 1, 0]);
    }

    #[test]
    fn incompatible_distribution_schemes_leave_the_accumulator_unchanged() {
        let with_scheme = |d: Distribution| MetricValue::new(Value::Distribution(d));
        let mut a = Distribution::linear(3, 10.0, 0.0).unwrap();
        a.add_sample(5.0);
        let mut b = Distribution::linear(5, 10.0, 0.0).unwrap();
        b.add_sample(6.0);

        let mut aggregator =
            OperationAggregator::new(&operation_with("sizes", with_scheme(a.clone())), kinds(&[]));
        aggregator.merge_operation(&operation_with("sizes", with_scheme(b)));

        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Distribution(a));
    }

    #[test]
    fn variant_mismatch_drops_the_incoming_value() {
        let mut aggregator =
            OperationAggregator::new(&operation_with("count", int_value(5)), kinds(&[]));
        aggregator
            .merge_operation(&operation_with("count", MetricValue::new(Value::Double(1.0))));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(5));
    }

    #[test]
    fn cumulative_keeps_the_latest_end_time() {
        let stamped = |v: i64, end: i64| {
            let mut mv = int_value(v);
            mv.end_time = Some(at(end));
            mv
        };
        let table = kinds(&[("total", MetricKind::Cumulative)]);

        let mut aggregator =
            OperationAggregator::new(&operation_with("total", stamped(10, 100)), table);
        // Older value: dropped.
        aggregator.merge_operation(&operation_with("total", stamped(99, 50)));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(10));

        // Newer value: replaces.
        aggregator.merge_operation(&operation_with("total", stamped(30, 200)));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(30));

        // Equal end time: also replaces.
        aggregator.merge_operation(&operation_with("total", stamped(42, 200)));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(42));
    }

    #[test]
    fn gauge_behaves_like_cumulative() {
        let stamped = |v: i64, end: i64| {
            let mut mv = int_value(v);
            mv.end_time = Some(at(end));
            mv
        };
        let table = kinds(&[("in_flight", MetricKind::Gauge)]);
        let mut aggregator =
            OperationAggregator::new(&operation_with("in_flight", stamped(3, 10)), table);
        aggregator.merge_operation(&operation_with("in_flight", stamped(5, 20)));
        aggregator.merge_operation(&operation_with("in_flight", stamped(9, 5)));
        let out = aggregator.to_operation();
        assert_eq!(out.metric_value_sets[0].metric_values[0].value, Value::Int64(5));
    }

    #[test]
    fn delta_widens_value_time_spans() {
        let spanned = |v: i64, start: i64, end: i64| {
            let mut mv = int_value(v);
            mv.start_time = Some(at(start));
            mv.end_time = Some(at(end));
            mv
        };
        let mut aggregator =
            OperationAggregator::new(&operation_with("count", spanned(1, 50, 60)), kinds(&[]));
        aggregator.merge_operation(&operation_with("count", spanned(2, 30, 55)));
        aggregator.merge_operation(&operation_with("count", spanned(3, 55, 90)));

        let out = aggregator.to_operation();
        let merged = &out.metric_value_sets[0].metric_values[0];
        assert_eq!(merged.start_time, Some(at(30)));
        assert_eq!(merged.end_time, Some(at(90)));
        assert_eq!(merged.value, Value::Int64(6));
    }

    #[test]
    fn operation_times_widen_and_logs_append_in_order() {
        let with_log = |text: &str, start: i64, end: i64| {
            let mut op = operation_with("count", int_value(1));
            op.start_time = Some(at(start));
            op.end_time = Some(at(end));
            op.log_entries.push(LogEntry { text_payload: text.into(), ..LogEntry::default() });
            op
        };
        let mut aggregator = OperationAggregator::new(&with_log("first", 100, 110), kinds(&[]));
        aggregator.merge_operation(&with_log("second", 90, 105));
        aggregator.merge_operation(&with_log("third", 120, 130));

        let out = aggregator.to_operation();
        assert_eq!(out.start_time, Some(at(90)));
        assert_eq!(out.end_time, Some(at(130)));
        let texts: Vec<&str> =
            out.log_entries.iter().map(|entry| entry.text_payload.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn values_with_different_labels_accumulate_separately() {
        let labeled = |v: i64, tier: &str| {
            let mut mv = int_value(v);
            mv.labels = Map::from([("tier".to_owned(), tier.to_owned())]);
            mv
        };
        let mut aggregator =
            OperationAggregator::new(&operation_with("count", labeled(1, "paid")), kinds(&[]));
        aggregator.merge_operation(&operation_with("count", labeled(10, "free")));
        aggregator.merge_operation(&operation_with("count", labeled(2, "paid")));

        let out = aggregator.to_operation();
        let mut values: Vec<i64> = out.metric_value_sets[0]
            .metric_values
            .iter()
            .map(|mv| match mv.value {
                Value::Int64(v) => v,
                _ => panic!("expected int64"),
            })
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![3, 10]);
    }

    #[test]
    fn high_importance_flag_survives_round_trip() {
        let mut op = operation_with("count", int_value(1));
        op.importance = Importance::High;
        let aggregator = OperationAggregator::new(&op, kinds(&[]));
        assert_eq!(aggregator.to_operation().importance, Importance::High);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Delta int64 aggregation over any split of a value list
            /// equals the arithmetic sum.
            #[test]
            fn delta_sum_law(values in proptest::collection::vec(-1_000i64..1_000, 1..20)) {
                let mut aggregator = OperationAggregator::new(
                    &operation_with("count", int_value(values[0])),
                    kinds(&[]),
                );
                for v in &values[1..] {
                    aggregator.merge_operation(&operation_with("count", int_value(*v)));
                }
                let out = aggregator.to_operation();
                prop_assert_eq!(
                    &out.metric_value_sets[0].metric_values[0].value,
                    &Value::Int64(values.iter().sum::<i64>()),
                );
            }

            /// Cumulative aggregation keeps exactly the value with the
            /// maximum end time.
            #[test]
            fn cumulative_latest_wins(ends in proptest::collection::vec(0i64..1_000, 1..20)) {
                let stamped = |v: i64, end: i64| {
                    let mut mv = int_value(v);
                    mv.end_time = Some(at(end));
                    mv
                };
                let table = kinds(&[("total", MetricKind::Cumulative)]);
                let mut aggregator = OperationAggregator::new(
                    &operation_with("total", stamped(ends[0], ends[0])),
                    table,
                );
                for end in &ends[1..] {
                    aggregator.merge_operation(&operation_with("total", stamped(*end, *end)));
                }
                let out = aggregator.to_operation();
                let max = *ends.iter().max().unwrap();
                prop_assert_eq!(
                    &out.metric_value_sets[0].metric_values[0].value,
                    &Value::Int64(max),
                );
            }
        }
    }
}
