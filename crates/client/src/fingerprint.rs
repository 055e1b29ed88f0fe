//! Stable fingerprints for cache keys.
//!
//! A fingerprint condenses the semantic identity of an operation, a
//! metric value, or a whole check request into a fixed 32-byte SHA-256
//! digest. Records with equal fingerprints are mergeable; records with
//! different identities never collide in practice at digest strength.
//!
//! Every field that influences identity is hashed, and nothing else.
//! Concatenated fields are separated by a single NUL byte so that field
//! boundaries are unambiguous (`"ab" + "c"` never hashes like
//! `"a" + "bc"`). Labels are hashed in lexicographic key order, which
//! is the natural iteration order of the `BTreeMap` they live in.

use metergate_types::{CheckRequest, MetricValue, Operation, Value};
use sha2::{Digest, Sha256};

/// Field separator; a single NUL byte.
const DELIMITER: &[u8] = &[0];

/// A 32-byte identity digest usable as a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// The raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}

/// Feeds `labels` into the hasher: `NUL key NUL value` per label, in
/// key order.
fn hash_labels<'a>(
    hasher: &mut Sha256,
    labels: impl IntoIterator<Item = (&'a String, &'a String)>,
) {
    for (key, value) in labels {
        hasher.update(DELIMITER);
        hasher.update(key.as_bytes());
        hasher.update(DELIMITER);
        hasher.update(value.as_bytes());
    }
}

/// Feeds the identity of one metric value into the hasher: its labels,
/// plus the currency code when the value is money (amounts in different
/// currencies must never share an accumulator).
fn hash_metric_value(hasher: &mut Sha256, metric_value: &MetricValue) {
    hash_labels(hasher, &metric_value.labels);
    if let Value::Money(money) = &metric_value.value {
        hasher.update(DELIMITER);
        hasher.update(money.currency_code.as_bytes());
    }
}

/// Fingerprint of an operation for report aggregation.
///
/// Covers consumer id, operation name, and the operation labels.
#[must_use]
pub fn operation_fingerprint(operation: &Operation) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(operation.consumer_id.as_bytes());
    hasher.update(DELIMITER);
    hasher.update(operation.operation_name.as_bytes());
    hash_labels(&mut hasher, &operation.labels);
    Fingerprint(hasher.finalize().into())
}

/// Fingerprint of a metric value for accumulator lookup.
#[must_use]
pub fn metric_value_fingerprint(metric_value: &MetricValue) -> Fingerprint {
    let mut hasher = Sha256::new();
    hash_metric_value(&mut hasher, metric_value);
    Fingerprint(hasher.finalize().into())
}

/// Fingerprint of a check request for decision caching.
///
/// Covers the operation name, consumer id, and operation labels, then
/// each metric value set in message order (metric name plus every
/// value's identity). Requests that would consume different quota
/// buckets therefore hash differently.
#[must_use]
pub fn check_request_fingerprint(request: &CheckRequest) -> Fingerprint {
    let mut hasher = Sha256::new();
    if let Some(operation) = &request.operation {
        hasher.update(operation.operation_name.as_bytes());
        hasher.update(DELIMITER);
        hasher.update(operation.consumer_id.as_bytes());
        hasher.update(DELIMITER);
        hash_labels(&mut hasher, &operation.labels);

        for set in &operation.metric_value_sets {
            hasher.update(DELIMITER);
            hasher.update(set.metric_name.as_bytes());
            for metric_value in &set.metric_values {
                hash_metric_value(&mut hasher, metric_value);
            }
        }
    }
    hasher.update(DELIMITER);
    Fingerprint(hasher.finalize().into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeMap;

    use metergate_types::{MetricValueSet, Money};

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    fn operation(name: &str, consumer: &str, pairs: &[(&str, &str)]) -> Operation {
        Operation {
            operation_name: name.into(),
            consumer_id: consumer.into(),
            labels: labels(pairs),
            ..Operation::default()
        }
    }

    #[test]
    fn identical_operations_share_a_fingerprint() {
        let a = operation("ListShelves", "project:acme", &[("zone", "eu-1")]);
        let b = operation("ListShelves", "project:acme", &[("zone", "eu-1")]);
        assert_eq!(operation_fingerprint(&a), operation_fingerprint(&b));
    }

    #[test]
    fn operation_id_does_not_affect_identity() {
        let mut a = operation("ListShelves", "project:acme", &[]);
        let mut b = a.clone();
        a.operation_id = "op-1".into();
        b.operation_id = "op-2".into();
        assert_eq!(operation_fingerprint(&a), operation_fingerprint(&b));
    }

    #[test]
    fn every_identity_field_matters() {
        let base = operation("ListShelves", "project:acme", &[("zone", "eu-1")]);
        let fp = operation_fingerprint(&base);

        let mut other = base.clone();
        other.operation_name = "GetShelf".into();
        assert_ne!(operation_fingerprint(&other), fp);

        let mut other = base.clone();
        other.consumer_id = "project:globex".into();
        assert_ne!(operation_fingerprint(&other), fp);

        let mut other = base.clone();
        other.labels = labels(&[("zone", "us-2")]);
        assert_ne!(operation_fingerprint(&other), fp);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        // Without delimiters these two would concatenate identically.
        let a = operation("ab", "c", &[]);
        let b = operation("a", "bc", &[]);
        assert_ne!(operation_fingerprint(&a), operation_fingerprint(&b));

        let a = operation("op", "c", &[("ab", "c")]);
        let b = operation("op", "c", &[("a", "bc")]);
        assert_ne!(operation_fingerprint(&a), operation_fingerprint(&b));
    }

    #[test]
    fn metric_value_identity_is_labels_only_for_plain_values() {
        let mut a = MetricValue::new(Value::Int64(1));
        a.labels = labels(&[("tier", "paid")]);
        let mut b = MetricValue::new(Value::Int64(999));
        b.labels = labels(&[("tier", "paid")]);
        // Different payloads, same identity: they merge.
        assert_eq!(metric_value_fingerprint(&a), metric_value_fingerprint(&b));

        let mut c = b.clone();
        c.labels = labels(&[("tier", "free")]);
        assert_ne!(metric_value_fingerprint(&a), metric_value_fingerprint(&c));
    }

    #[test]
    fn money_identity_includes_currency() {
        let usd = MetricValue::new(Value::Money(Money::new("USD", 1, 0)));
        let eur = MetricValue::new(Value::Money(Money::new("EUR", 1, 0)));
        assert_ne!(metric_value_fingerprint(&usd), metric_value_fingerprint(&eur));
    }

    #[test]
    fn check_fingerprint_covers_metric_value_sets() {
        let mut op = operation("ListShelves", "project:acme", &[("zone", "eu-1")]);
        let base = CheckRequest {
            service_name: "metering.example.com".into(),
            operation: Some(op.clone()),
            ..CheckRequest::default()
        };
        let fp = check_request_fingerprint(&base);

        // Same request hashes identically.
        assert_eq!(check_request_fingerprint(&base.clone()), fp);

        // Adding a metric value set changes the identity.
        op.metric_value_sets.push(MetricValueSet {
            metric_name: "quota_tokens".into(),
            metric_values: vec![MetricValue::new(Value::Int64(10))],
        });
        let with_metrics = CheckRequest { operation: Some(op), ..base.clone() };
        assert_ne!(check_request_fingerprint(&with_metrics), fp);
    }

    #[test]
    fn check_fingerprint_ignores_service_name() {
        // Identity lives in the operation; the service name is validated
        // separately before the cache is consulted.
        let op = operation("ListShelves", "project:acme", &[]);
        let a = CheckRequest {
            service_name: "a.example.com".into(),
            operation: Some(op.clone()),
            ..CheckRequest::default()
        };
        let b = CheckRequest {
            service_name: "b.example.com".into(),
            operation: Some(op),
            ..CheckRequest::default()
        };
        assert_eq!(check_request_fingerprint(&a), check_request_fingerprint(&b));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_labels() -> impl Strategy<Value = BTreeMap<String, String>> {
            proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..4)
        }

        fn arb_operation() -> impl Strategy<Value = Operation> {
            ("[a-zA-Z./]{1,16}", "[a-z:0-9]{1,16}", arb_labels()).prop_map(
                |(operation_name, consumer_id, labels)| Operation {
                    operation_name,
                    consumer_id,
                    labels,
                    ..Operation::default()
                },
            )
        }

        proptest! {
            /// Equal identities hash equal; perturbing any identity
            /// field breaks equality.
            #[test]
            fn fingerprint_is_stable_and_sensitive(op in arb_operation()) {
                let fp = operation_fingerprint(&op);
                prop_assert_eq!(operation_fingerprint(&op.clone()), fp);

                let mut renamed = op.clone();
                renamed.operation_name.push('x');
                prop_assert_ne!(operation_fingerprint(&renamed), fp);

                let mut relabeled = op;
                relabeled.labels.insert("extra".into(), "label".into());
                prop_assert_ne!(operation_fingerprint(&relabeled), fp);
            }
        }
    }
}
