//! Patch builder: turns a reconcile plan into line-level edit operations.

use crate::models::{
    meter_resolution, ExistingLine, InvoicedLine, Line, ManagedBy, PendingLine, SplitLineGroup,
    SplitLineHierarchy, SubscriptionView,
};
use crate::sync::differ::{ReconcilePlan, UpsertCandidate};
use crate::sync::phase_iterator::GeneratedItem;
use crate::sync::pricing::line_price;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum LinePatch {
    CreateLine(PendingLine),
    DeleteLine { invoice_id: Uuid, line_id: Uuid },
    UpdateLine(Line),
    DeleteSplitGroup { group_id: Uuid },
    UpdateSplitGroup(SplitLineGroup),
}

impl LinePatch {
    pub fn kind(&self) -> &'static str {
        match self {
            LinePatch::CreateLine(_) => "create_line",
            LinePatch::DeleteLine { .. } => "delete_line",
            LinePatch::UpdateLine(_) => "update_line",
            LinePatch::DeleteSplitGroup { .. } => "delete_split_group",
            LinePatch::UpdateSplitGroup(_) => "update_split_group",
        }
    }

    /// The invoice an existing-line patch edits.
    pub fn invoice_id(&self) -> Option<Uuid> {
        match self {
            LinePatch::DeleteLine { invoice_id, .. } => Some(*invoice_id),
            LinePatch::UpdateLine(line) => Some(line.invoice_id),
            _ => None,
        }
    }

    pub fn line_id(&self) -> Option<Uuid> {
        match self {
            LinePatch::DeleteLine { line_id, .. } => Some(*line_id),
            LinePatch::UpdateLine(line) => Some(line.id),
            _ => None,
        }
    }

    fn delete(line: &Line) -> Self {
        LinePatch::DeleteLine {
            invoice_id: line.invoice_id,
            line_id: line.id,
        }
    }
}

fn truncates_to_empty(line: &Line) -> bool {
    line.price.is_usage_based() && line.period.truncate(meter_resolution()).is_empty()
}

pub struct PatchBuilder<'a> {
    subscription: &'a SubscriptionView,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(subscription: &'a SubscriptionView) -> Self {
        Self { subscription }
    }

    #[instrument(skip_all, fields(subscription_id = %self.subscription.id))]
    pub fn build(&self, plan: &ReconcilePlan) -> Vec<LinePatch> {
        let mut patches = Vec::new();

        for existing in &plan.lines_to_delete {
            patches.extend(self.delete_existing(existing));
        }

        patches.extend(plan.new_items.iter().filter_map(|item| self.create_line(item)));

        for candidate in &plan.lines_to_upsert {
            patches.extend(self.upsert(candidate));
        }

        tracing::debug!(patches = patches.len(), "Built line patches");
        patches
    }

    fn delete_existing(&self, existing: &ExistingLine) -> Vec<LinePatch> {
        if existing.is_sync_ignored() {
            return Vec::new();
        }

        match existing {
            ExistingLine::Line(invoiced) if invoiced.line.is_deleted() => Vec::new(),
            ExistingLine::Line(invoiced) => vec![LinePatch::delete(&invoiced.line)],
            ExistingLine::Hierarchy(hierarchy) => {
                let mut patches = Vec::new();
                if hierarchy.group.deleted_at.is_none() {
                    patches.push(LinePatch::DeleteSplitGroup {
                        group_id: hierarchy.group.id,
                    });
                }
                patches.extend(
                    hierarchy
                        .lines
                        .iter()
                        .filter(|child| !child.line.is_deleted())
                        .map(|child| LinePatch::delete(&child.line)),
                );
                patches
            }
        }
    }

    fn create_line(&self, item: &GeneratedItem) -> Option<LinePatch> {
        let price = line_price(self.subscription, item)?;

        Some(LinePatch::CreateLine(PendingLine {
            namespace: self.subscription.namespace.clone(),
            customer_id: self.subscription.customer_id,
            name: item.rate_card.name.clone(),
            currency: self.subscription.currency.clone(),
            feature_key: item.rate_card.feature_key.clone(),
            period: item.service_period,
            invoice_at: item.invoice_at(),
            price,
            child_unique_reference_id: item.unique_id.clone(),
            subscription: item.subscription_reference(),
        }))
    }

    fn upsert(&self, candidate: &UpsertCandidate) -> Vec<LinePatch> {
        match &candidate.existing {
            ExistingLine::Line(invoiced) => self
                .upsert_line(&candidate.target, invoiced)
                .into_iter()
                .collect(),
            ExistingLine::Hierarchy(hierarchy) => {
                if candidate.existing.is_sync_ignored() {
                    return Vec::new();
                }
                self.upsert_hierarchy(&candidate.target, hierarchy)
            }
        }
    }

    fn upsert_line(&self, target: &GeneratedItem, existing: &InvoicedLine) -> Option<LinePatch> {
        let line = &existing.line;
        if line.annotations.sync_ignore() || line.managed_by == ManagedBy::Manual {
            return None;
        }

        let Some(price) = line_price(self.subscription, target) else {
            return (!line.is_deleted()).then(|| LinePatch::delete(line));
        };

        let mut updated = line.clone();
        updated.period = target.service_period;
        if existing.invoice_status.is_gathering() {
            updated.invoice_at = target.invoice_at();
        }
        updated.price = price;
        updated.deleted_at = None;

        if truncates_to_empty(&updated) {
            return (!line.is_deleted()).then(|| LinePatch::delete(line));
        }

        (updated != *line).then_some(LinePatch::UpdateLine(updated))
    }

    fn upsert_hierarchy(
        &self,
        target: &GeneratedItem,
        hierarchy: &SplitLineHierarchy,
    ) -> Vec<LinePatch> {
        let group_end = hierarchy.group.service_period.to;
        let target_end = target.service_period.to;

        if target_end == group_end {
            return Vec::new();
        }

        let mut patches = Vec::new();

        if target_end > group_end {
            if let Some(last) = hierarchy.lines.last() {
                let mut child = last.line.clone();
                child.period.to = target_end;
                if child.managed_by != ManagedBy::Manual {
                    child.deleted_at = None;
                }
                if last.invoice_status.is_gathering() {
                    child.invoice_at = target.invoice_at();
                }
                if child != last.line {
                    patches.push(LinePatch::UpdateLine(child));
                }
            }
        } else {
            for existing in &hierarchy.lines {
                let child = &existing.line;
                if child.is_deleted() {
                    continue;
                }

                if child.period.from >= target_end {
                    patches.push(LinePatch::delete(child));
                } else if child.period.to > target_end {
                    let mut truncated = child.clone();
                    truncated.period.to = target_end;
                    if existing.invoice_status.is_gathering() {
                        truncated.invoice_at = truncated.invoice_at.min(target_end);
                    }

                    if truncates_to_empty(&truncated) {
                        patches.push(LinePatch::delete(child));
                    } else {
                        patches.push(LinePatch::UpdateLine(truncated));
                    }
                }
            }
        }

        let mut group = hierarchy.group.clone();
        group.service_period.to = target_end;
        group.deleted_at = None;
        patches.push(LinePatch::UpdateSplitGroup(group));

        patches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        InvoiceStatus, LinePrice, PaymentTerm, Period, UsagePrice, ANNOTATION_SYNC_IGNORE,
    };
    use crate::sync::collector::collect_upcoming_lines;
    use crate::sync::differ::{diff, SyncPlan};
    use crate::sync::testing::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn usage_price() -> LinePrice {
        LinePrice::Usage(UsagePrice {
            unit_amount: dec!(1),
        })
    }

    fn fee_subscription() -> SubscriptionView {
        let start = date(2024, 1, 1);
        subscription(
            start,
            vec![phase(
                "default",
                start,
                None,
                vec![("fee", vec![version(start, None, flat(dec!(5), PaymentTerm::InAdvance))])],
            )],
        )
    }

    fn usage_subscription(end: Option<DateTime<Utc>>) -> SubscriptionView {
        let start = date(2024, 1, 1);
        let mut sub = subscription(
            start,
            vec![phase(
                "default",
                start,
                None,
                vec![("api", vec![version(start, None, usage(dec!(1)))])],
            )],
        );
        sub.active_to = end;
        sub
    }

    fn build(sub: &SubscriptionView, as_of: DateTime<Utc>, existing: Vec<ExistingLine>) -> Vec<LinePatch> {
        let upcoming = collect_upcoming_lines(sub, as_of).unwrap();
        match diff(upcoming, existing).unwrap() {
            SyncPlan::Empty => Vec::new(),
            SyncPlan::Reconcile(plan) => PatchBuilder::new(sub).build(&plan),
        }
    }

    fn first_unique_id(sub: &SubscriptionView, as_of: DateTime<Utc>) -> String {
        collect_upcoming_lines(sub, as_of).unwrap().items[0]
            .unique_id
            .clone()
    }

    #[test]
    fn test_creates_pending_lines() {
        let sub = fee_subscription();
        let patches = build(&sub, date(2024, 3, 1), vec![]);

        assert_eq!(patches.len(), 2);
        let LinePatch::CreateLine(line) = &patches[0] else {
            panic!("expected a create patch");
        };
        assert_eq!(line.period, Period::new(date(2024, 1, 1), date(2024, 2, 1)));
        assert_eq!(line.invoice_at, date(2024, 1, 1));
        assert_eq!(line.price, flat_line_price(dec!(5), PaymentTerm::InAdvance));
        assert_eq!(line.subscription.subscription_id, sub.id);
    }

    #[test]
    fn test_unchanged_line_yields_no_patch() {
        let sub = fee_subscription();
        let as_of = date(2024, 1, 15);
        let unique_id = first_unique_id(&sub, as_of);
        let mut existing = existing_line(
            &unique_id,
            Period::new(date(2024, 1, 1), date(2024, 2, 1)),
            flat_line_price(dec!(5), PaymentTerm::InAdvance),
            InvoiceStatus::Gathering,
        );
        existing.line.invoice_at = date(2024, 1, 1);

        assert!(build(&sub, as_of, vec![ExistingLine::Line(existing)]).is_empty());
    }

    #[test]
    fn test_changed_price_updates_line() {
        let sub = fee_subscription();
        let as_of = date(2024, 1, 15);
        let unique_id = first_unique_id(&sub, as_of);
        let existing = existing_line(
            &unique_id,
            Period::new(date(2024, 1, 1), date(2024, 2, 1)),
            flat_line_price(dec!(3), PaymentTerm::InAdvance),
            InvoiceStatus::Issued,
        );
        let original_invoice_at = existing.line.invoice_at;

        let patches = build(&sub, as_of, vec![ExistingLine::Line(existing)]);

        assert_eq!(patches.len(), 1);
        let LinePatch::UpdateLine(line) = &patches[0] else {
            panic!("expected an update patch");
        };
        assert_eq!(line.price, flat_line_price(dec!(5), PaymentTerm::InAdvance));
        assert_eq!(line.invoice_at, original_invoice_at);
    }

    #[test]
    fn test_sync_ignored_line_is_never_patched() {
        let sub = fee_subscription();
        let as_of = date(2024, 1, 15);
        let unique_id = first_unique_id(&sub, as_of);
        let mut existing = existing_line(
            &unique_id,
            Period::new(date(2023, 6, 1), date(2023, 7, 1)),
            flat_line_price(dec!(999), PaymentTerm::InAdvance),
            InvoiceStatus::Gathering,
        );
        existing.line.annotations.set(ANNOTATION_SYNC_IGNORE, true);
        let mut orphan = existing_line(
            "orphan",
            Period::new(date(2023, 6, 1), date(2023, 7, 1)),
            flat_line_price(dec!(1), PaymentTerm::InAdvance),
            InvoiceStatus::Gathering,
        );
        orphan.line.annotations.set(ANNOTATION_SYNC_IGNORE, true);

        let patches = build(
            &sub,
            as_of,
            vec![ExistingLine::Line(existing), ExistingLine::Line(orphan)],
        );
        assert!(patches.is_empty());
    }

    #[test]
    fn test_deleted_manual_line_is_not_recreated() {
        let sub = fee_subscription();
        let as_of = date(2024, 1, 15);
        let unique_id = first_unique_id(&sub, as_of);
        let mut existing = existing_line(
            &unique_id,
            Period::new(date(2024, 1, 1), date(2024, 2, 1)),
            flat_line_price(dec!(5), PaymentTerm::InAdvance),
            InvoiceStatus::Gathering,
        );
        existing.line.managed_by = ManagedBy::Manual;
        existing.line.deleted_at = Some(date(2024, 1, 2));

        assert!(build(&sub, as_of, vec![ExistingLine::Line(existing)]).is_empty());
    }

    #[test]
    fn test_stale_line_is_deleted_once() {
        let sub = fee_subscription();
        let stale = existing_line(
            "stale",
            Period::new(date(2023, 1, 1), date(2023, 2, 1)),
            flat_line_price(dec!(5), PaymentTerm::InAdvance),
            InvoiceStatus::Gathering,
        );
        let mut already_deleted = stale.clone();
        already_deleted.line.child_unique_reference_id = Some("stale-deleted".to_string());
        already_deleted.line.deleted_at = Some(date(2023, 3, 1));

        let patches = build(
            &sub,
            date(2024, 1, 1),
            vec![ExistingLine::Line(stale.clone()), ExistingLine::Line(already_deleted)],
        );

        let deletes: Vec<_> = patches
            .iter()
            .filter(|patch| matches!(patch, LinePatch::DeleteLine { .. }))
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].line_id(), Some(stale.line.id));
    }

    #[test]
    fn test_stale_hierarchy_deletes_group_and_children() {
        let sub = fee_subscription();
        let stale = hierarchy(
            "stale-group",
            usage_price(),
            vec![
                (Period::new(date(2023, 1, 1), date(2023, 1, 15)), InvoiceStatus::Issued),
                (Period::new(date(2023, 1, 15), date(2023, 2, 1)), InvoiceStatus::Gathering),
            ],
        );

        let patches = build(&sub, date(2024, 1, 1), vec![stale]);
        let kinds: Vec<_> = patches
            .iter()
            .filter(|patch| !matches!(patch, LinePatch::CreateLine(_)))
            .map(LinePatch::kind)
            .collect();
        assert_eq!(kinds, vec!["delete_split_group", "delete_line", "delete_line"]);
    }

    #[test]
    fn test_cancellation_truncates_hierarchy() {
        let cancel = date(2024, 1, 20);
        let sub = usage_subscription(Some(cancel));
        let unique_id = first_unique_id(&sub, cancel);

        let existing = hierarchy(
            &unique_id,
            usage_price(),
            vec![
                (Period::new(date(2024, 1, 1), date(2024, 1, 10)), InvoiceStatus::Issued),
                (Period::new(date(2024, 1, 10), date(2024, 2, 1)), InvoiceStatus::Gathering),
            ],
        );

        let patches = build(&sub, cancel, vec![existing]);

        assert_eq!(patches.len(), 2);
        let LinePatch::UpdateLine(child) = &patches[0] else {
            panic!("expected the last child to be truncated");
        };
        assert_eq!(child.period, Period::new(date(2024, 1, 10), cancel));
        assert_eq!(child.invoice_at, cancel);
        let LinePatch::UpdateSplitGroup(group) = &patches[1] else {
            panic!("expected the group to shrink");
        };
        assert_eq!(group.service_period.to, cancel);
    }

    #[test]
    fn test_shrink_deletes_children_beyond_new_end() {
        let cancel = date(2024, 1, 5);
        let sub = usage_subscription(Some(cancel));
        let unique_id = first_unique_id(&sub, cancel);

        let existing = hierarchy(
            &unique_id,
            usage_price(),
            vec![
                (Period::new(date(2024, 1, 1), date(2024, 1, 10)), InvoiceStatus::Issued),
                (Period::new(date(2024, 1, 10), date(2024, 2, 1)), InvoiceStatus::Gathering),
            ],
        );

        let kinds: Vec<_> = build(&sub, cancel, vec![existing])
            .iter()
            .map(LinePatch::kind)
            .collect();
        assert_eq!(kinds, vec!["update_line", "delete_line", "update_split_group"]);
    }

    #[test]
    fn test_extension_grows_last_child_and_group() {
        let sub = usage_subscription(None);
        let as_of = date(2024, 2, 15);
        let unique_id = first_unique_id(&sub, as_of);

        let mut existing = hierarchy(
            &unique_id,
            usage_price(),
            vec![
                (Period::new(date(2024, 1, 1), date(2024, 1, 10)), InvoiceStatus::Issued),
                (Period::new(date(2024, 1, 10), date(2024, 1, 20)), InvoiceStatus::Gathering),
            ],
        );
        if let ExistingLine::Hierarchy(hierarchy) = &mut existing {
            hierarchy.lines[1].line.deleted_at = Some(date(2024, 1, 20));
        }

        let patches = build(&sub, as_of, vec![existing]);

        assert_eq!(patches.len(), 2);
        let LinePatch::UpdateLine(child) = &patches[0] else {
            panic!("expected the last child to be extended");
        };
        assert_eq!(child.period.to, date(2024, 2, 1));
        assert_eq!(child.deleted_at, None);
        assert_eq!(child.invoice_at, date(2024, 2, 1));
        let LinePatch::UpdateSplitGroup(group) = &patches[1] else {
            panic!("expected the group to grow");
        };
        assert_eq!(group.service_period.to, date(2024, 2, 1));
    }

    #[test]
    fn test_extension_keeps_manually_deleted_child_deleted() {
        let sub = usage_subscription(None);
        let as_of = date(2024, 2, 15);
        let unique_id = first_unique_id(&sub, as_of);
        let removed_at = date(2024, 1, 20);

        let mut existing = hierarchy(
            &unique_id,
            usage_price(),
            vec![
                (Period::new(date(2024, 1, 1), date(2024, 1, 10)), InvoiceStatus::Issued),
                (Period::new(date(2024, 1, 10), date(2024, 1, 20)), InvoiceStatus::Gathering),
            ],
        );
        if let ExistingLine::Hierarchy(hierarchy) = &mut existing {
            hierarchy.lines[1].line.managed_by = ManagedBy::Manual;
            hierarchy.lines[1].line.deleted_at = Some(removed_at);
        }

        let patches = build(&sub, as_of, vec![existing]);

        let LinePatch::UpdateLine(child) = &patches[0] else {
            panic!("expected the last child to follow the group");
        };
        assert_eq!(child.managed_by, ManagedBy::Manual);
        assert_eq!(child.deleted_at, Some(removed_at));
        assert_eq!(child.period.to, date(2024, 2, 1));
        assert!(matches!(&patches[1], LinePatch::UpdateSplitGroup(group)
            if group.service_period.to == date(2024, 2, 1)));
    }

    #[test]
    fn test_sync_ignored_child_protects_hierarchy() {
        let cancel = date(2024, 1, 20);
        let sub = usage_subscription(Some(cancel));
        let unique_id = first_unique_id(&sub, cancel);

        let mut existing = hierarchy(
            &unique_id,
            usage_price(),
            vec![
                (Period::new(date(2024, 1, 1), date(2024, 1, 10)), InvoiceStatus::Issued),
                (Period::new(date(2024, 1, 10), date(2024, 2, 1)), InvoiceStatus::Gathering),
            ],
        );
        if let ExistingLine::Hierarchy(hierarchy) = &mut existing {
            hierarchy.lines[0].line.annotations.set(ANNOTATION_SYNC_IGNORE, true);
        }

        assert!(build(&sub, cancel, vec![existing]).is_empty());
    }
}
