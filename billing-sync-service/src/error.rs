//! Errors that abort a synchronization run.

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("subscription {subscription_id} has recurring items but no billing anchor")]
    MissingBillingAnchor { subscription_id: Uuid },

    #[error("phase '{phase_key}' not found in subscription {subscription_id}")]
    PhaseNotFound {
        subscription_id: Uuid,
        phase_key: String,
    },

    #[error("duplicate unique reference id '{unique_id}'")]
    DuplicateUniqueReference { unique_id: String },

    #[error("line {line_id} not found in invoice {invoice_id}")]
    LineNotFound { invoice_id: Uuid, line_id: Uuid },

    #[error("invoice {invoice_id} not found")]
    InvoiceNotFound { invoice_id: Uuid },

    #[error("subscription {subscription_id} not found")]
    SubscriptionNotFound { subscription_id: Uuid },

    #[error(transparent)]
    Collaborator(#[from] AppError),
}

impl SyncError {
    /// Internal-consistency violations point at a bug in a collaborator or in
    /// the engine itself; retrying will not help.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateUniqueReference { .. } | SyncError::LineNotFound { .. }
        )
    }
}
