//! Sync differ: matches generated items against the lines already persisted
//! for a subscription by their unique reference id.

use crate::error::SyncError;
use crate::models::ExistingLine;
use crate::sync::collector::UpcomingLines;
use crate::sync::phase_iterator::GeneratedItem;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::instrument;

/// A generated item paired with the line that already materializes it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCandidate {
    pub target: GeneratedItem,
    pub existing: ExistingLine,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub new_items: Vec<GeneratedItem>,
    pub lines_to_delete: Vec<ExistingLine>,
    pub lines_to_upsert: Vec<UpsertCandidate>,
    pub max_generation_time_limit: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncPlan {
    /// Nothing generated and nothing persisted.
    Empty,
    Reconcile(ReconcilePlan),
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        matches!(self, SyncPlan::Empty)
    }
}

/// Index existing lines by unique reference id. Lines without one are manual
/// additions and do not take part in the sync.
fn index_existing(existing: Vec<ExistingLine>) -> Result<BTreeMap<String, ExistingLine>, SyncError> {
    let mut index = BTreeMap::new();

    for line in existing {
        let Some(unique_id) = line.unique_reference_id().map(str::to_string) else {
            continue;
        };
        if index.contains_key(&unique_id) {
            return Err(SyncError::DuplicateUniqueReference { unique_id });
        }
        index.insert(unique_id, line);
    }

    Ok(index)
}

/// Re-anchor an item onto the end of its pinned predecessor.
///
/// Applies only when the predecessor carries both sync-ignore and
/// force-continuous and the item's own line is not pinned itself.
fn correct_period_start(item: &mut GeneratedItem, existing: &BTreeMap<String, ExistingLine>) {
    if existing
        .get(&item.unique_id)
        .is_some_and(ExistingLine::is_sync_ignored)
    {
        return;
    }

    let Some(predecessor) = item
        .predecessor_unique_id()
        .and_then(|id| existing.get(&id))
    else {
        return;
    };

    let annotations = predecessor.annotations();
    if !(annotations.sync_ignore() && annotations.force_continuous()) {
        return;
    }

    let anchor = predecessor.period().to;
    if anchor == item.service_period.from || anchor >= item.service_period.to {
        return;
    }

    tracing::debug!(
        unique_id = %item.unique_id,
        from = %item.service_period.from,
        to = %anchor,
        "Re-anchoring period start onto pinned predecessor"
    );

    let previous_start = item.service_period.from;
    item.service_period.from = anchor;
    item.full_service_period.from = anchor;
    if item.billing_period.from == previous_start {
        item.billing_period.from = anchor;
    }
}

#[instrument(skip_all, fields(generated = upcoming.items.len(), existing = existing.len()))]
pub fn diff(upcoming: UpcomingLines, existing: Vec<ExistingLine>) -> Result<SyncPlan, SyncError> {
    let mut existing = index_existing(existing)?;

    if upcoming.items.is_empty() && existing.is_empty() {
        return Ok(SyncPlan::Empty);
    }

    let mut seen = HashSet::with_capacity(upcoming.items.len());
    let mut plan = ReconcilePlan {
        max_generation_time_limit: upcoming.max_generation_time_limit,
        ..ReconcilePlan::default()
    };

    let mut items = upcoming.items;
    for item in &mut items {
        if !seen.insert(item.unique_id.clone()) {
            return Err(SyncError::DuplicateUniqueReference {
                unique_id: item.unique_id.clone(),
            });
        }
        correct_period_start(item, &existing);
    }

    for item in items {
        match existing.remove(&item.unique_id) {
            Some(line) => plan.lines_to_upsert.push(UpsertCandidate {
                target: item,
                existing: line,
            }),
            None => plan.new_items.push(item),
        }
    }

    plan.lines_to_delete = existing.into_values().collect();

    tracing::debug!(
        new = plan.new_items.len(),
        upsert = plan.lines_to_upsert.len(),
        delete = plan.lines_to_delete.len(),
        "Computed sync plan"
    );

    Ok(SyncPlan::Reconcile(plan))
}
