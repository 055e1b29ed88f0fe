//! Transport seams to the remote metering service.
//!
//! The client never speaks a wire protocol itself; it calls one of
//! these traits and treats the result as authoritative. Implementations
//! own framing, authentication, retries and deadlines; none of that
//! happens at this layer. A completion may resolve inline, on the
//! caller's task, or on a transport-owned thread; the client tolerates
//! all three.

use async_trait::async_trait;
use metergate_types::{CheckRequest, CheckResponse, ReportRequest, ReportResponse};

use crate::error::Result;

/// Sends admission checks to the metering service.
#[async_trait]
pub trait CheckTransport: Send + Sync {
    /// Performs one remote check call.
    ///
    /// # Errors
    ///
    /// Implementations map their failures onto
    /// [`Error`](crate::Error); the client forwards whatever is
    /// returned here to its caller unchanged.
    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse>;
}

/// Sends usage reports to the metering service.
#[async_trait]
pub trait ReportTransport: Send + Sync {
    /// Performs one remote report call.
    ///
    /// # Errors
    ///
    /// Implementations map their failures onto
    /// [`Error`](crate::Error); the client forwards whatever is
    /// returned here to its caller unchanged.
    async fn report(&self, request: &ReportRequest) -> Result<ReportResponse>;
}
