//! Request and response messages exchanged with the metering service.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// Reasons an admission check can be denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckErrorCode {
    /// The consumer has exhausted its quota for the operation.
    ResourceExhausted,
    /// The consumer is not permitted to call the operation.
    PermissionDenied,
    /// The consumer id was not recognized.
    ConsumerInvalid,
    /// The service is not activated for the consumer.
    ServiceNotActivated,
    /// Billing is disabled for the consumer.
    BillingDisabled,
    /// The backend could not classify the denial.
    Other,
}

/// One reason a check was denied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckError {
    /// The denial category.
    pub code: CheckErrorCode,
    /// Human-readable detail for logs.
    pub detail: String,
}

/// An admission check: "may this operation proceed, and account for it".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// The service the operation belongs to.
    pub service_name: String,
    /// Which revision of the service configuration the caller used.
    pub service_config_id: String,
    /// The operation to admit.
    pub operation: Option<Operation>,
}

/// The verdict for a [`CheckRequest`].
///
/// An empty `check_errors` list means the operation is admitted; any
/// entries mean it is denied for the listed reasons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Echo of the checked operation's id.
    pub operation_id: String,
    /// The service configuration revision the backend evaluated.
    pub service_config_id: String,
    /// Denial reasons; empty for a pass.
    pub check_errors: Vec<CheckError>,
}

impl CheckResponse {
    /// Whether this response denies the operation.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        !self.check_errors.is_empty()
    }
}

/// A usage report: operations to record for billing and monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// The service the operations belong to.
    pub service_name: String,
    /// Which revision of the service configuration the caller used.
    pub service_config_id: String,
    /// The operations to record.
    pub operations: Vec<Operation>,
}

/// A partial failure recording one operation of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    /// The operation the error applies to.
    pub operation_id: String,
    /// Why it was not recorded.
    pub message: String,
}

/// The outcome of a [`ReportRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportResponse {
    /// Per-operation failures; empty when everything was recorded.
    pub report_errors: Vec<ReportError>,
    /// The service configuration revision the backend used.
    pub service_config_id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_check_errors_is_a_pass() {
        assert!(!CheckResponse::default().is_denial());
        let denied = CheckResponse {
            check_errors: vec![CheckError {
                code: CheckErrorCode::ResourceExhausted,
                detail: "out of quota".into(),
            }],
            ..CheckResponse::default()
        };
        assert!(denied.is_denial());
    }

    #[test]
    fn report_request_round_trips_through_serde() {
        let req = ReportRequest {
            service_name: "metering.example.com".into(),
            service_config_id: "2026-07-01r0".into(),
            operations: vec![Operation::default()],
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ReportRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
