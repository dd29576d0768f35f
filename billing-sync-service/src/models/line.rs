//! Invoice line model as seen by the sync engine.

use crate::models::{InvoiceStatus, PaymentTerm, Period, UsagePrice};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The engine never modifies or deletes a line carrying this annotation.
pub const ANNOTATION_SYNC_IGNORE: &str = "billing.subscription.sync.ignore";

/// Together with [`ANNOTATION_SYNC_IGNORE`] on the line preceding a gap, lets
/// the next period start where this line ends.
pub const ANNOTATION_FORCE_CONTINUOUS: &str = "billing.subscription.sync.force-continuous";

/// Who owns the content of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedBy {
    System,
    Subscription,
    Manual,
}

/// Boolean annotations attached to lines and split-line groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotations(BTreeMap<String, bool>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: bool) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: bool) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> bool {
        self.0.get(key).copied().unwrap_or(false)
    }

    pub fn sync_ignore(&self) -> bool {
        self.get(ANNOTATION_SYNC_IGNORE)
    }

    pub fn force_continuous(&self) -> bool {
        self.get(ANNOTATION_FORCE_CONTINUOUS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinePrice {
    Flat {
        per_unit_amount: Decimal,
        payment_term: PaymentTerm,
    },
    Usage(UsagePrice),
}

impl LinePrice {
    pub fn is_usage_based(&self) -> bool {
        matches!(self, LinePrice::Usage(_))
    }
}

/// Links a line back to the subscription item it was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionReference {
    pub subscription_id: Uuid,
    pub phase_id: Uuid,
    pub item_id: Uuid,
}

/// Persisted invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub namespace: String,
    pub customer_id: Uuid,
    pub name: String,
    pub currency: String,
    pub feature_key: Option<String>,
    pub period: Period,
    pub invoice_at: DateTime<Utc>,
    pub price: LinePrice,
    pub managed_by: ManagedBy,
    pub annotations: Annotations,
    /// Identity of the generated item this line materializes; `None` for
    /// purely manual lines.
    pub child_unique_reference_id: Option<String>,
    pub subscription: Option<SubscriptionReference>,
    pub split_line_group_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Line {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A line the engine asks the billing collaborator to place on the
/// customer's gathering invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLine {
    pub namespace: String,
    pub customer_id: Uuid,
    pub name: String,
    pub currency: String,
    pub feature_key: Option<String>,
    pub period: Period,
    pub invoice_at: DateTime<Utc>,
    pub price: LinePrice,
    pub child_unique_reference_id: String,
    pub subscription: SubscriptionReference,
}

/// A line together with the status of the invoice that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicedLine {
    pub line: Line,
    pub invoice_status: InvoiceStatus,
}

/// Parent record of a progressively billed charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLineGroup {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
    pub currency: String,
    pub service_period: Period,
    pub price: LinePrice,
    pub unique_reference_id: Option<String>,
    pub subscription: Option<SubscriptionReference>,
    pub annotations: Annotations,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A split-line group and its child lines, ordered by period start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLineHierarchy {
    pub group: SplitLineGroup,
    pub lines: Vec<InvoicedLine>,
}

/// An existing billing record for a subscription: either a standalone line
/// or a split-line hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistingLine {
    Line(InvoicedLine),
    Hierarchy(SplitLineHierarchy),
}

impl ExistingLine {
    pub fn unique_reference_id(&self) -> Option<&str> {
        match self {
            ExistingLine::Line(invoiced) => invoiced.line.child_unique_reference_id.as_deref(),
            ExistingLine::Hierarchy(hierarchy) => hierarchy.group.unique_reference_id.as_deref(),
        }
    }

    pub fn period(&self) -> Period {
        match self {
            ExistingLine::Line(invoiced) => invoiced.line.period,
            ExistingLine::Hierarchy(hierarchy) => hierarchy.group.service_period,
        }
    }

    pub fn annotations(&self) -> &Annotations {
        match self {
            ExistingLine::Line(invoiced) => &invoiced.line.annotations,
            ExistingLine::Hierarchy(hierarchy) => &hierarchy.group.annotations,
        }
    }

    /// A hierarchy is protected when the group or any child is.
    pub fn is_sync_ignored(&self) -> bool {
        match self {
            ExistingLine::Line(invoiced) => invoiced.line.annotations.sync_ignore(),
            ExistingLine::Hierarchy(hierarchy) => {
                hierarchy.group.annotations.sync_ignore()
                    || hierarchy
                        .lines
                        .iter()
                        .any(|child| child.line.annotations.sync_ignore())
            }
        }
    }
}
