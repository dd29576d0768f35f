//! Inbound events that trigger a sync.

use crate::models::Invoice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Periodic or explicit request to bring a subscription's lines up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSyncEvent {
    pub subscription_id: Uuid,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCancelledEvent {
    pub subscription_id: Uuid,
    pub effective_end: DateTime<Utc>,
}

/// Emitted by the billing collaborator after it created an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreatedEvent {
    pub invoice: Invoice,
}
