//! # Audit Collaborator
//!
//! Failed postings, cancellations and ticket completions are reported to an
//! [`AuditSink`]. The sink is a side channel: if it fails, the failure is
//! logged and the caller still gets the original error.
//!
//! ```text
//! InvoiceService::post ──► Err(InsufficientStock)
//!        │
//!        ├──► sink.record_failure(event) ──► Err(AuditError) ──► warn!, dropped
//!        │
//!        └──► return Err(InsufficientStock)   (unchanged)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::error::DbError;

/// What the engine was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PostInvoice,
    CancelInvoice,
    DeleteInvoice,
    CompleteTicket,
    VoidTicket,
    AdjustStock,
    StockCount,
}

/// A failure report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    /// Document, ticket or product the operation targeted.
    pub subject_id: String,
    pub error: String,
    pub retryable: bool,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn failure(action: AuditAction, subject_id: impl Into<String>, err: &DbError) -> Self {
        AuditEvent {
            action,
            subject_id: subject_id.into(),
            error: err.to_string(),
            retryable: err.is_retryable(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for failure reports.
pub trait AuditSink: Send + Sync {
    fn record_failure(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Default sink: one `error!` event carrying the JSON payload.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_failure(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let payload = serde_json::to_string(event)?;
        error!(
            action = ?event.action,
            subject_id = %event.subject_id,
            payload = %payload,
            "Ledger operation failed"
        );
        Ok(())
    }
}

/// Reports `err` and hands it back untouched.
///
/// ## Example
/// ```rust,ignore
/// let result = self.post_inner(id).await;
/// result.map_err(|e| audit::report(self.audit.as_ref(), AuditAction::PostInvoice, id, e))
/// ```
pub fn report(sink: &dyn AuditSink, action: AuditAction, subject_id: &str, err: DbError) -> DbError {
    let event = AuditEvent::failure(action, subject_id, &err);
    if let Err(sink_err) = sink.record_failure(&event) {
        warn!(error = %sink_err, subject_id, "Audit sink failed; original error preserved");
    }
    err
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tally_core::CoreError;

    /// Sink that remembers every event.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl AuditSink for RecordingSink {
        fn record_failure(&self, event: &AuditEvent) -> Result<(), AuditError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Sink that is always down.
    pub struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn record_failure(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn test_report_records_event() {
        let sink = RecordingSink::default();
        let err = report(
            &sink,
            AuditAction::PostInvoice,
            "inv-1",
            CoreError::AlreadyPosted {
                document_id: "inv-1".into(),
            }
            .into(),
        );

        assert!(matches!(err, DbError::Domain(CoreError::AlreadyPosted { .. })));
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject_id, "inv-1");
        assert!(!events[0].retryable);
    }

    #[test]
    fn test_broken_sink_does_not_mask_error() {
        let err = report(
            &BrokenSink,
            AuditAction::CancelInvoice,
            "inv-2",
            DbError::conflict("Product", "p-1"),
        );
        assert!(matches!(err, DbError::Conflict { .. }));
    }

    #[test]
    fn test_tracing_sink_serializes() {
        let event = AuditEvent::failure(
            AuditAction::CompleteTicket,
            "t-1",
            &DbError::Busy("database is locked".into()),
        );
        assert!(TracingAuditSink.record_failure(&event).is_ok());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "complete_ticket");
        assert_eq!(json["retryable"], true);
    }
}
