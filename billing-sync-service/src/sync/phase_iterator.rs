//! Period generator.
//!
//! Turns one phase of a subscription into the billing items that should exist
//! for it up to a horizon. Every item version is generated independently:
//! one-time rate cards yield a single item, recurring ones yield one item per
//! cadence cycle until the item or the phase deactivates, or until the next
//! item would be invoiced beyond the horizon.
//!
//! In-advance items are invoiced at the start of their billing period, so for
//! the same horizon the generator emits one more period for them than for
//! in-arrears items.

use crate::error::SyncError;
use crate::models::{
    meter_resolution, ActiveWindow, Cadence, ItemVersion, PaymentTerm, Period, PhaseView,
    RateCard, SubscriptionReference, SubscriptionView,
};
use crate::services::metrics::record_generator_safety_cap;
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

/// Upper bound of consecutive steps that fail to advance the cursor before
/// an item version is given up on.
pub const MAX_SAFE_ITERATIONS: usize = 1000;

/// Generation limit, compared against an item's invoice-at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Items invoiced strictly before the instant.
    Before(DateTime<Utc>),
    /// Items invoiced at or before the instant.
    Through(DateTime<Utc>),
}

impl Horizon {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Horizon::Before(at) | Horizon::Through(at) => *at,
        }
    }

    pub fn admits(&self, invoice_at: DateTime<Utc>) -> bool {
        match self {
            Horizon::Before(at) => invoice_at < *at,
            Horizon::Through(at) => invoice_at <= *at,
        }
    }
}

/// Deterministic identity of a generated item, stable across runs.
pub fn unique_id(
    subscription_id: Uuid,
    phase_key: &str,
    item_key: &str,
    version: usize,
    period_index: usize,
) -> String {
    format!("{subscription_id}/{phase_key}/{item_key}/v[{version}]/period[{period_index}]")
}

/// One time-sliced billing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedItem {
    pub unique_id: String,
    pub subscription_id: Uuid,
    pub phase_id: Uuid,
    pub phase_key: String,
    pub item_key: String,
    pub item_version_id: Uuid,
    pub version: usize,
    pub period_index: usize,
    pub rate_card: RateCard,
    /// Span actually billed.
    pub service_period: Period,
    /// Nominal cadence cycle before truncation; the proration denominator.
    pub full_service_period: Period,
    /// Aligned billing cycle, never crossing the phase boundary.
    pub billing_period: Period,
}

impl GeneratedItem {
    pub fn invoice_at(&self) -> DateTime<Utc> {
        match self.rate_card.payment_term() {
            PaymentTerm::InAdvance => self.billing_period.from,
            PaymentTerm::InArrears => self.service_period.to.max(self.billing_period.to),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.rate_card.billing_cadence.is_some()
    }

    pub fn subscription_reference(&self) -> SubscriptionReference {
        SubscriptionReference {
            subscription_id: self.subscription_id,
            phase_id: self.phase_id,
            item_id: self.item_version_id,
        }
    }

    /// Identity of the previous period of the same item version.
    pub fn predecessor_unique_id(&self) -> Option<String> {
        let previous = self.period_index.checked_sub(1)?;
        Some(unique_id(
            self.subscription_id,
            &self.phase_key,
            &self.item_key,
            self.version,
            previous,
        ))
    }

    fn truncated(mut self) -> Self {
        let resolution = meter_resolution();
        self.service_period = self.service_period.truncate(resolution);
        self.full_service_period = self.full_service_period.truncate(resolution);
        self.billing_period = self.billing_period.truncate(resolution);
        self
    }
}

/// Items generated for a phase plus the earliest invoice-at that the horizon
/// refused, which tells the caller when the phase has new content.
#[derive(Debug, Clone, Default)]
pub struct PhaseGeneration {
    pub items: Vec<GeneratedItem>,
    pub next_invoice_at: Option<DateTime<Utc>>,
}

pub struct PhaseIterator<'a> {
    subscription: &'a SubscriptionView,
    phase: &'a PhaseView,
}

impl<'a> PhaseIterator<'a> {
    pub fn new(subscription: &'a SubscriptionView, phase_key: &str) -> Result<Self, SyncError> {
        let phase = subscription
            .phase(phase_key)
            .ok_or_else(|| SyncError::PhaseNotFound {
                subscription_id: subscription.id,
                phase_key: phase_key.to_string(),
            })?;

        Ok(Self {
            subscription,
            phase,
        })
    }

    pub fn phase(&self) -> &PhaseView {
        self.phase
    }

    pub fn phase_window(&self) -> ActiveWindow {
        self.subscription.phase_window(self.phase)
    }

    /// Generate every item of the phase admitted by `horizon`.
    #[instrument(
        skip(self),
        fields(subscription_id = %self.subscription.id, phase_key = %self.phase.key)
    )]
    pub fn generate(&self, horizon: Horizon) -> Result<PhaseGeneration, SyncError> {
        let mut generation = PhaseGeneration::default();

        for (item_key, versions) in &self.phase.items {
            for (version, item) in versions.iter().enumerate() {
                if !item.rate_card.is_billable() {
                    continue;
                }

                let mut periods = self.item_periods(item_key, version, item)?;
                let mut generated = Vec::new();

                for candidate in periods.by_ref() {
                    let candidate = candidate.truncated();
                    let invoice_at = candidate.invoice_at();
                    if !horizon.admits(invoice_at) {
                        generation.next_invoice_at = Some(
                            generation
                                .next_invoice_at
                                .map_or(invoice_at, |next| next.min(invoice_at)),
                        );
                        break;
                    }
                    generated.push(candidate);
                }

                if periods.capped {
                    // Steps that never advanced the cursor are not billable periods.
                    while generated
                        .last()
                        .is_some_and(|item| item.service_period.is_empty())
                    {
                        generated.pop();
                    }
                    tracing::error!(
                        item_key = %item_key,
                        version = version,
                        iterations = MAX_SAFE_ITERATIONS,
                        kept = generated.len(),
                        "Period generation stalled at the safety cap"
                    );
                    record_generator_safety_cap();
                }

                generation.items.extend(
                    generated
                        .into_iter()
                        .filter(|item| !(item.service_period.is_empty() && item.rate_card.is_usage_based())),
                );
            }
        }

        tracing::debug!(
            items = generation.items.len(),
            horizon = %horizon.at(),
            "Generated phase items"
        );

        Ok(generation)
    }

    /// First moment any item of the phase could be invoiced.
    pub fn min_billable_time(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let mut earliest: Option<DateTime<Utc>> = None;

        for (item_key, versions) in &self.phase.items {
            for (version, item) in versions.iter().enumerate() {
                if !item.rate_card.is_billable() {
                    continue;
                }

                let first = self
                    .item_periods(item_key, version, item)?
                    .next()
                    .map(|generated| generated.truncated().invoice_at());

                if let Some(first) = first {
                    earliest = Some(earliest.map_or(first, |current| current.min(first)));
                }
            }
        }

        Ok(earliest)
    }

    fn item_periods(
        &self,
        item_key: &'a str,
        version: usize,
        item: &'a ItemVersion,
    ) -> Result<ItemPeriods<'a>, SyncError> {
        let phase_window = self.phase_window();
        let cadence = item.rate_card.billing_cadence;

        // One-time items inside a bounded phase are not aligned to anything.
        let anchor = if cadence.is_some() || phase_window.to.is_none() {
            Some(self.subscription.billing_anchor()?)
        } else {
            None
        };

        let active = item.active_window().intersection(&phase_window);

        Ok(ItemPeriods {
            subscription: self.subscription,
            phase: self.phase,
            phase_window,
            item_key,
            version,
            item,
            cadence,
            anchor,
            active,
            cursor: active.map_or(phase_window.from, |window| window.from),
            index: 0,
            stalled: 0,
            done: false,
            capped: false,
        })
    }
}

/// Lazy sequence of periods for one item version.
struct ItemPeriods<'a> {
    subscription: &'a SubscriptionView,
    phase: &'a PhaseView,
    phase_window: ActiveWindow,
    item_key: &'a str,
    version: usize,
    item: &'a ItemVersion,
    cadence: Option<Cadence>,
    anchor: Option<DateTime<Utc>>,
    active: Option<ActiveWindow>,
    cursor: DateTime<Utc>,
    index: usize,
    stalled: usize,
    done: bool,
    capped: bool,
}

impl ItemPeriods<'_> {
    fn billing_period_at(&self, at: DateTime<Utc>) -> Option<Period> {
        let anchor = self.anchor?;
        self.subscription
            .billing_cadence
            .aligned_period(anchor, at)
            .map(|period| period.clip_to(&self.phase_window))
    }

    fn build(&self, service: Period, full: Period, billing: Period) -> GeneratedItem {
        GeneratedItem {
            unique_id: unique_id(
                self.subscription.id,
                &self.phase.key,
                self.item_key,
                self.version,
                self.index,
            ),
            subscription_id: self.subscription.id,
            phase_id: self.phase.id,
            phase_key: self.phase.key.clone(),
            item_key: self.item_key.to_string(),
            item_version_id: self.item.id,
            version: self.version,
            period_index: self.index,
            rate_card: self.item.rate_card.clone(),
            service_period: service,
            full_service_period: full,
            billing_period: billing,
        }
    }

    fn one_time(&mut self, active: ActiveWindow) -> GeneratedItem {
        self.done = true;

        match (self.phase_window.to, active.to) {
            (Some(_), Some(end)) => {
                let service = Period::new(active.from, end);
                self.build(service, service, service)
            }
            // Nothing to prorate against: bill at activation, in the
            // enclosing billing cycle.
            _ => {
                let service = Period::instant(active.from);
                let billing = self.billing_period_at(active.from).unwrap_or(service);
                self.build(service, service, billing)
            }
        }
    }

    fn recurring(&mut self, active: ActiveWindow, cadence: Cadence) -> Option<GeneratedItem> {
        if self.stalled >= MAX_SAFE_ITERATIONS {
            self.done = true;
            self.capped = true;
            return None;
        }

        let instant = active.is_instant();
        if let Some(end) = active.to {
            if self.cursor >= end && !(instant && self.index == 0) {
                self.done = true;
                return None;
            }
        }

        let anchor = self.anchor?;
        let full = cadence
            .aligned_period(anchor, self.cursor)
            .unwrap_or_else(|| Period::instant(self.cursor));

        let service_to = match active.to {
            Some(end) => full.to.min(end),
            None => full.to,
        };
        let service = Period::new(self.cursor, service_to.max(self.cursor));
        let billing = self.billing_period_at(service.from).unwrap_or(service);

        let generated = self.build(service, full, billing);

        if service.to > self.cursor || instant {
            self.stalled = 0;
        } else {
            self.stalled += 1;
        }
        self.cursor = service.to;
        self.index += 1;
        if instant {
            self.done = true;
        }

        Some(generated)
    }
}

impl Iterator for ItemPeriods<'_> {
    type Item = GeneratedItem;

    fn next(&mut self) -> Option<GeneratedItem> {
        if self.done {
            return None;
        }

        let Some(active) = self.active else {
            self.done = true;
            return None;
        };

        match self.cadence {
            None => Some(self.one_time(active)),
            Some(cadence) => self.recurring(active, cadence),
        }
    }
}
