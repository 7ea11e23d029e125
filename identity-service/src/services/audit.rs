//! Audit recorder.
//!
//! Writes are awaited inline so the trail stays ordered with the action
//! that produced it, but a failed write is only logged: the security
//! decision that triggered the event has already been committed.

use std::sync::Arc;

use crate::models::{AuditEvent, AuditQuery};
use crate::repository::AuditRepository;
use crate::services::error::ServiceResult;

#[derive(Clone)]
pub struct AuditRecorder {
    repo: Arc<dyn AuditRepository>,
}

impl AuditRecorder {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, event: AuditEvent) {
        match self.repo.insert_audit_event(&event).await {
            Ok(()) => tracing::debug!(
                action = %event.action,
                status = %event.status,
                account_id = ?event.account_id,
                "Audit event recorded"
            ),
            Err(e) => tracing::error!(
                error = %e,
                action = %event.action,
                account_id = ?event.account_id,
                "Failed to write audit event"
            ),
        }
    }

    pub async fn list(&self, query: &AuditQuery) -> ServiceResult<Vec<AuditEvent>> {
        Ok(self.repo.list_audit_events(query).await?)
    }
}
