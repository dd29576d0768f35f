//! Read-only subscription snapshot consumed by the sync engine.

use crate::error::SyncError;
use crate::models::{ActiveWindow, Cadence, Period};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Whether a flat fee is invoiced before or after the period it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerm {
    InAdvance,
    InArrears,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatPrice {
    pub amount: Decimal,
    pub payment_term: PaymentTerm,
}

/// Usage-based price. The billed amount is resolved later from metered usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePrice {
    pub unit_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Price {
    Flat(FlatPrice),
    Usage(UsagePrice),
}

/// Priced line item template within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    pub name: String,
    pub feature_key: Option<String>,
    /// `None` for entitlement-only rate cards.
    pub price: Option<Price>,
    /// `None` for one-time charges.
    pub billing_cadence: Option<Cadence>,
}

impl RateCard {
    pub fn is_billable(&self) -> bool {
        self.price.is_some()
    }

    pub fn is_usage_based(&self) -> bool {
        matches!(self.price, Some(Price::Usage(_)))
    }

    /// Usage is always charged in arrears.
    pub fn payment_term(&self) -> PaymentTerm {
        match &self.price {
            Some(Price::Flat(flat)) => flat.payment_term,
            _ => PaymentTerm::InArrears,
        }
    }
}

/// One version of a subscription item. Edits create a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVersion {
    pub id: Uuid,
    pub active_from: DateTime<Utc>,
    pub active_to: Option<DateTime<Utc>>,
    pub rate_card: RateCard,
}

impl ItemVersion {
    pub fn active_window(&self) -> ActiveWindow {
        ActiveWindow::new(self.active_from, self.active_to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseView {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub active_from: DateTime<Utc>,
    pub active_to: Option<DateTime<Utc>>,
    /// Item key to versions, oldest first.
    pub items: BTreeMap<String, Vec<ItemVersion>>,
}

impl PhaseView {
    pub fn has_billables(&self) -> bool {
        self.items
            .values()
            .flatten()
            .any(|version| version.rate_card.is_billable())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProrationConfig {
    pub enabled: bool,
}

/// Namespace-scoped customer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerRef {
    pub namespace: String,
    pub customer_id: Uuid,
}

/// Immutable snapshot of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub id: Uuid,
    pub namespace: String,
    pub customer_id: Uuid,
    pub name: String,
    pub currency: String,
    pub billing_anchor: Option<DateTime<Utc>>,
    pub billing_cadence: Cadence,
    pub proration: ProrationConfig,
    pub active_from: DateTime<Utc>,
    pub active_to: Option<DateTime<Utc>>,
    /// Phases in chronological order.
    pub phases: Vec<PhaseView>,
}

impl SubscriptionView {
    pub fn customer(&self) -> CustomerRef {
        CustomerRef {
            namespace: self.namespace.clone(),
            customer_id: self.customer_id,
        }
    }

    pub fn active_window(&self) -> ActiveWindow {
        ActiveWindow::new(self.active_from, self.active_to)
    }

    pub fn phase(&self, key: &str) -> Option<&PhaseView> {
        self.phases.iter().find(|phase| phase.key == key)
    }

    /// The phase's activation window, cut off at the subscription's end.
    pub fn phase_window(&self, phase: &PhaseView) -> ActiveWindow {
        let to = match (phase.active_to, self.active_to) {
            (Some(phase_end), Some(sub_end)) => Some(phase_end.min(sub_end)),
            (phase_end, sub_end) => phase_end.or(sub_end),
        };
        ActiveWindow::new(phase.active_from, to)
    }

    pub fn has_billables(&self) -> bool {
        self.phases.iter().any(PhaseView::has_billables)
    }

    pub fn billing_anchor(&self) -> Result<DateTime<Utc>, SyncError> {
        self.billing_anchor
            .ok_or(SyncError::MissingBillingAnchor {
                subscription_id: self.id,
            })
    }

    /// The aligned billing cycle containing `at`, clipped to the subscription.
    /// `None` when the billing cadence is degenerate.
    pub fn billing_period_at(&self, at: DateTime<Utc>) -> Result<Option<Period>, SyncError> {
        let anchor = self.billing_anchor()?;
        Ok(self
            .billing_cadence
            .aligned_period(anchor, at)
            .map(|period| period.clip_to(&self.active_window())))
    }
}
