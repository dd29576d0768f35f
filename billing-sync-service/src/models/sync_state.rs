//! Sync state model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of the latest sync run for a subscription, read by the scheduler
/// that decides when to run it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncState {
    pub subscription_id: Uuid,
    pub has_billables: bool,
    pub synced_at: DateTime<Utc>,
    pub next_sync_after: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Whether the scheduler should run the subscription again at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_sync_after.is_some_and(|next| next <= now)
    }
}
