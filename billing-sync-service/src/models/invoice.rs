//! Invoice model and validation issues.

use crate::models::{CustomerRef, Line};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Gathering,
    Draft,
    Issued,
    Paid,
    Voided,
}

/// What the engine may do to an invoice in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceMutability {
    /// Append-only draft accumulating pending lines; invoice-at may change.
    Gathering,
    /// Standard invoice not yet finalized; lines may change, invoice-at may not.
    Mutable,
    /// Finalized; changes are reported as validation issues instead.
    Immutable,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Gathering => "gathering",
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Voided => "voided",
        }
    }

    pub fn mutability(&self) -> InvoiceMutability {
        match self {
            InvoiceStatus::Gathering => InvoiceMutability::Gathering,
            InvoiceStatus::Draft => InvoiceMutability::Mutable,
            InvoiceStatus::Issued | InvoiceStatus::Paid | InvoiceStatus::Voided => {
                InvoiceMutability::Immutable
            }
        }
    }

    pub fn is_gathering(&self) -> bool {
        matches!(self, InvoiceStatus::Gathering)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub path: String,
    pub component: String,
}

impl ValidationIssue {
    /// Issues are identified by path, code and message.
    pub fn same_issue(&self, other: &ValidationIssue) -> bool {
        self.path == other.path && self.code == other.code && self.message == other.message
    }
}

/// Append `incoming` to `existing`, skipping issues already present.
///
/// Returns `None` when nothing new would be added.
pub fn merge_validation_issues(
    existing: &[ValidationIssue],
    incoming: Vec<ValidationIssue>,
) -> Option<Vec<ValidationIssue>> {
    let mut merged = existing.to_vec();
    let mut added = false;

    for issue in incoming {
        if merged.iter().any(|present| present.same_issue(&issue)) {
            continue;
        }
        merged.push(issue);
        added = true;
    }

    added.then_some(merged)
}

/// Invoice snapshot with its lines expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub namespace: String,
    pub customer_id: Uuid,
    pub currency: String,
    pub status: InvoiceStatus,
    pub lines: Vec<Line>,
    pub validation_issues: Vec<ValidationIssue>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn customer(&self) -> CustomerRef {
        CustomerRef {
            namespace: self.namespace.clone(),
            customer_id: self.customer_id,
        }
    }

    pub fn active_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter().filter(|line| !line.is_deleted())
    }

    pub fn has_active_lines(&self) -> bool {
        self.active_lines().next().is_some()
    }
}
