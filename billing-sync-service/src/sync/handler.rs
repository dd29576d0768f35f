//! Event handlers and the sync run that ties the pipeline together.

use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::models::{SubscriptionView, SyncState};
use crate::services::adapter::{BillingAdapter, SubscriptionSource, SyncStateStore};
use crate::services::metrics::{record_sync_run, start_sync_run_timer};
use crate::sync::collector::collect_upcoming_lines;
use crate::sync::differ::{diff, SyncPlan};
use crate::sync::events::{InvoiceCreatedEvent, SubscriptionCancelledEvent, SubscriptionSyncEvent};
use crate::sync::patch::{LinePatch, PatchBuilder};
use crate::sync::updater::{InvoiceUpdater, UpdateSummary};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRunReport {
    pub patches: Vec<LinePatch>,
    pub summary: UpdateSummary,
    pub sync_state: SyncState,
}

async fn observed<T>(
    trigger: &'static str,
    run: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    let timer = start_sync_run_timer(trigger);
    let result = run.await;

    let status = match &result {
        Ok(_) => "ok",
        Err(e) => {
            tracing::error!(
                error = %e,
                trigger = trigger,
                consistency_violation = e.is_consistency_violation(),
                "Sync run failed"
            );
            "error"
        }
    };
    record_sync_run(trigger, status);
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    result
}

#[derive(Clone)]
pub struct SyncHandler {
    billing: Arc<dyn BillingAdapter>,
    subscriptions: Arc<dyn SubscriptionSource>,
    sync_states: Arc<dyn SyncStateStore>,
    settings: SyncSettings,
}

impl SyncHandler {
    pub fn new(
        billing: Arc<dyn BillingAdapter>,
        subscriptions: Arc<dyn SubscriptionSource>,
        sync_states: Arc<dyn SyncStateStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            billing,
            subscriptions,
            sync_states,
            settings,
        }
    }

    async fn load_view(&self, subscription_id: Uuid) -> Result<SubscriptionView, SyncError> {
        self.subscriptions
            .get_view(subscription_id)
            .await?
            .ok_or(SyncError::SubscriptionNotFound { subscription_id })
    }

    /// Reconcile the subscription's invoice lines with what it should have
    /// produced as of `as_of`, then record the sync state.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.id, as_of = %as_of))]
    pub async fn sync_subscription(
        &self,
        subscription: &SubscriptionView,
        as_of: DateTime<Utc>,
    ) -> Result<SyncRunReport, SyncError> {
        let customer = subscription.customer();

        let (patches, summary, next_invoice_at) = {
            let _lock = self.billing.lock_customer(&customer).await?;

            let existing = self.billing.list_subscription_lines(subscription.id).await?;
            let upcoming = collect_upcoming_lines(subscription, as_of)?;
            let next_invoice_at = upcoming.next_invoice_at;

            let patches = match diff(upcoming, existing)? {
                SyncPlan::Empty => Vec::new(),
                SyncPlan::Reconcile(plan) => PatchBuilder::new(subscription).build(&plan),
            };

            let summary = if patches.is_empty() {
                UpdateSummary::default()
            } else {
                InvoiceUpdater::new(self.billing.as_ref())
                    .apply(&customer, patches.clone(), Utc::now())
                    .await?
            };

            (patches, summary, next_invoice_at)
        };

        let has_billables = subscription.has_billables();
        let sync_state = SyncState {
            subscription_id: subscription.id,
            has_billables,
            synced_at: Utc::now(),
            next_sync_after: next_invoice_at.filter(|_| has_billables),
        };
        self.sync_states.upsert_sync_state(&sync_state).await?;

        tracing::info!(
            patches = patches.len(),
            next_sync_after = ?sync_state.next_sync_after,
            "Subscription synced"
        );

        Ok(SyncRunReport {
            patches,
            summary,
            sync_state,
        })
    }

    #[instrument(skip(self, event), fields(subscription_id = %event.subscription_id))]
    pub async fn handle_subscription_sync(
        &self,
        event: &SubscriptionSyncEvent,
    ) -> Result<SyncRunReport, SyncError> {
        observed("subscription_sync", async {
            let view = self.load_view(event.subscription_id).await?;
            let report = self.sync_subscription(&view, event.as_of).await?;

            if self.settings.invoice_pending_lines_on_sync {
                let invoiced = self
                    .billing
                    .invoice_pending_lines(&view.customer(), event.as_of)
                    .await?;
                if !invoiced.is_empty() {
                    tracing::info!(invoices = invoiced.len(), "Invoiced pending lines");
                }
            }

            Ok(report)
        })
        .await
    }

    /// Final sync up to the cancellation; nothing is invoiced.
    #[instrument(skip(self, event), fields(subscription_id = %event.subscription_id))]
    pub async fn handle_subscription_cancelled(
        &self,
        event: &SubscriptionCancelledEvent,
    ) -> Result<SyncRunReport, SyncError> {
        observed("subscription_cancelled", async {
            let view = self.load_view(event.subscription_id).await?;
            self.sync_subscription(&view, event.effective_end).await
        })
        .await
    }

    /// Re-sync every subscription with lines on a newly created standard
    /// invoice, as of the invoice's creation.
    #[instrument(skip(self, event), fields(invoice_id = %event.invoice.id))]
    pub async fn handle_invoice_created(
        &self,
        event: &InvoiceCreatedEvent,
    ) -> Result<Vec<SyncRunReport>, SyncError> {
        let invoice = &event.invoice;
        if invoice.status.is_gathering() {
            return Ok(Vec::new());
        }

        let subscription_ids: BTreeSet<Uuid> = invoice
            .lines
            .iter()
            .filter_map(|line| line.subscription.map(|reference| reference.subscription_id))
            .collect();

        observed("invoice_created", async {
            let mut reports = Vec::with_capacity(subscription_ids.len());
            for subscription_id in subscription_ids {
                let Some(view) = self.subscriptions.get_view(subscription_id).await? else {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        "Invoice references an unknown subscription, skipping"
                    );
                    continue;
                };
                reports.push(self.sync_subscription(&view, invoice.created_at).await?);
            }
            Ok(reports)
        })
        .await
    }
}
