//! Collaborator contracts the sync engine is written against.
//!
//! The billing collaborator owns invoices and lines, the subscription
//! collaborator owns subscription views, and the sync-state store records the
//! outcome of each run for the scheduler.

use crate::models::{
    CustomerRef, ExistingLine, Invoice, Line, PendingLine, SplitLineGroup, SubscriptionView,
    SyncState, ValidationIssue,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::any::Any;
use uuid::Uuid;

/// Customer-scoped lock. Dropping it releases the lock.
pub struct CustomerLock {
    customer: CustomerRef,
    _guard: Box<dyn Any + Send>,
}

impl CustomerLock {
    pub fn new(customer: CustomerRef, guard: impl Any + Send) -> Self {
        Self {
            customer,
            _guard: Box::new(guard),
        }
    }

    pub fn customer(&self) -> &CustomerRef {
        &self.customer
    }
}

impl std::fmt::Debug for CustomerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerLock")
            .field("customer", &self.customer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BillingAdapter: Send + Sync {
    /// Serialize invoice mutation for one customer.
    async fn lock_customer(&self, customer: &CustomerRef) -> Result<CustomerLock, AppError>;

    async fn list_invoices(&self, customer: &CustomerRef) -> Result<Vec<Invoice>, AppError>;

    /// Fetch an invoice with its lines expanded, deleted ones included.
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Every line ever generated for the subscription, deleted ones included,
    /// with split lines grouped into their hierarchies.
    async fn list_subscription_lines(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<ExistingLine>, AppError>;

    /// Place lines on the customer's gathering invoice(s).
    async fn create_pending_lines(
        &self,
        customer: &CustomerRef,
        lines: Vec<PendingLine>,
    ) -> Result<Vec<Line>, AppError>;

    /// Persist the desired state of a gathering invoice.
    async fn update_gathering_invoice(&self, invoice: Invoice) -> Result<Invoice, AppError>;

    /// Persist the desired state of a mutable standard invoice.
    async fn update_standard_invoice(&self, invoice: Invoice) -> Result<Invoice, AppError>;

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), AppError>;

    async fn upsert_split_line_group(
        &self,
        group: SplitLineGroup,
    ) -> Result<SplitLineGroup, AppError>;

    async fn delete_split_line_group(&self, group_id: Uuid) -> Result<(), AppError>;

    /// Replace the invoice's validation issues with `issues`.
    async fn upsert_validation_issues(
        &self,
        invoice_id: Uuid,
        issues: Vec<ValidationIssue>,
    ) -> Result<(), AppError>;

    /// Move gathering lines due at `as_of` onto new standard invoices.
    async fn invoice_pending_lines(
        &self,
        customer: &CustomerRef,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, AppError>;
}

#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn get_view(&self, subscription_id: Uuid) -> Result<Option<SubscriptionView>, AppError>;
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), AppError>;

    async fn get_sync_state(&self, subscription_id: Uuid) -> Result<Option<SyncState>, AppError>;
}
