//! Upcoming-lines collector: walks the phases of a subscription and asks the
//! period generator for everything billable as of a given instant.

use crate::error::SyncError;
use crate::models::{PhaseView, SubscriptionView};
use crate::sync::phase_iterator::{GeneratedItem, Horizon, PhaseIterator};
use chrono::{DateTime, Utc};
use tracing::instrument;

#[derive(Debug, Clone, Default)]
pub struct UpcomingLines {
    pub items: Vec<GeneratedItem>,
    /// Latest generation limit used across the visited phases.
    pub max_generation_time_limit: Option<DateTime<Utc>>,
    /// Earliest moment a further sync would find new content.
    pub next_invoice_at: Option<DateTime<Utc>>,
}

fn earliest(current: Option<DateTime<Utc>>, candidate: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[instrument(skip(subscription), fields(subscription_id = %subscription.id))]
pub fn collect_upcoming_lines(
    subscription: &SubscriptionView,
    as_of: DateTime<Utc>,
) -> Result<UpcomingLines, SyncError> {
    let mut upcoming = UpcomingLines::default();

    for (index, phase) in subscription.phases.iter().enumerate() {
        if phase.has_billables() {
            let iterator = PhaseIterator::new(subscription, &phase.key)?;

            if let Some(horizon) = generation_limit(subscription, &iterator, as_of)? {
                let generation = iterator.generate(horizon)?;
                upcoming.items.extend(generation.items);
                upcoming.next_invoice_at =
                    earliest(upcoming.next_invoice_at, generation.next_invoice_at);
                upcoming.max_generation_time_limit = Some(
                    upcoming
                        .max_generation_time_limit
                        .map_or(horizon.at(), |limit| limit.max(horizon.at())),
                );
            }
        }

        let phase_end = subscription.phase_window(phase).to;
        if phase_end.is_some_and(|end| end < as_of) {
            continue;
        }

        // Later phases cannot have billable content yet.
        if has_later_billables(&subscription.phases[index + 1..]) {
            upcoming.next_invoice_at = earliest(upcoming.next_invoice_at, phase_end);
        }
        break;
    }

    tracing::debug!(
        items = upcoming.items.len(),
        max_generation_time_limit = ?upcoming.max_generation_time_limit,
        "Collected upcoming lines"
    );

    Ok(upcoming)
}

fn has_later_billables(phases: &[PhaseView]) -> bool {
    phases.iter().any(PhaseView::has_billables)
}

/// The horizon a phase is generated up to, or `None` if the phase can have
/// nothing billable.
fn generation_limit(
    subscription: &SubscriptionView,
    iterator: &PhaseIterator<'_>,
    as_of: DateTime<Utc>,
) -> Result<Option<Horizon>, SyncError> {
    let mut horizon = match subscription.active_to {
        // Ended subscriptions are billed through their end.
        Some(end) if end <= as_of => Horizon::Through(end),
        _ if as_of < subscription.active_from => Horizon::Through(subscription.active_from),
        _ => {
            let cycle_end = subscription.billing_period_at(as_of)?.map(|cycle| cycle.to);
            Horizon::Before(cycle_end.map_or(as_of, |end| end.min(as_of)))
        }
    };

    if iterator.phase_window().from > horizon.at() {
        match iterator.min_billable_time()? {
            Some(first) => horizon = Horizon::Through(first),
            None => return Ok(None),
        }
    }

    Ok(Some(horizon))
}
