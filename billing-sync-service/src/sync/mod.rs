//! The subscription-to-invoice synchronization pipeline.
//!
//! `collector` and `phase_iterator` derive what a subscription should have
//! billed, `differ` and `patch` compare it with what is persisted, and
//! `updater` applies the result. `handler` wires the steps to the inbound
//! events.

pub mod collector;
pub mod differ;
pub mod events;
pub mod handler;
pub mod patch;
pub mod phase_iterator;
pub mod pricing;
pub mod updater;

#[cfg(test)]
mod testing;

pub use collector::{collect_upcoming_lines, UpcomingLines};
pub use differ::{diff, ReconcilePlan, SyncPlan, UpsertCandidate};
pub use events::{InvoiceCreatedEvent, SubscriptionCancelledEvent, SubscriptionSyncEvent};
pub use handler::{SyncHandler, SyncRunReport};
pub use patch::{LinePatch, PatchBuilder};
pub use phase_iterator::{unique_id, GeneratedItem, Horizon, PhaseIterator, MAX_SAFE_ITERATIONS};
pub use pricing::line_price;
pub use updater::{
    apply_line_patches, InvoiceUpdater, UpdateSummary, IMMUTABLE_INVOICE_UPDATE_CODE,
};
