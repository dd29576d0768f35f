//! Invoice updater: applies line patches through the billing collaborator.
//!
//! Creations go to the gathering invoice, split-group patches are applied as
//! is, and the remaining patches are grouped per invoice. Mutable invoices are
//! edited as a pure snapshot transform; finalized invoices get a validation
//! warning per refused patch instead.

use crate::error::SyncError;
use crate::models::{
    merge_validation_issues, CustomerRef, Invoice, InvoiceMutability, Severity, ValidationIssue,
};
use crate::services::adapter::BillingAdapter;
use crate::services::metrics::{record_patch, record_validation_issues};
use crate::sync::patch::LinePatch;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::instrument;
use uuid::Uuid;

pub const IMMUTABLE_INVOICE_UPDATE_CODE: &str = "immutable_invoice_update_unsupported";
pub const VALIDATION_COMPONENT: &str = "subscription-sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub lines_created: usize,
    pub invoices_updated: usize,
    pub invoices_deleted: usize,
    pub split_groups_updated: usize,
    pub split_groups_deleted: usize,
    pub validation_issues_added: usize,
}

/// Warning recorded when `patch` cannot be applied to a finalized invoice.
pub fn immutable_invoice_issue(patch: &LinePatch) -> Option<ValidationIssue> {
    let line_id = patch.line_id()?;
    let message = match patch {
        LinePatch::DeleteLine { .. } => {
            "line should be removed by the subscription but the invoice is already finalized"
        }
        _ => "line should be updated by the subscription but the invoice is already finalized",
    };

    Some(ValidationIssue {
        severity: Severity::Warning,
        code: IMMUTABLE_INVOICE_UPDATE_CODE.to_string(),
        message: message.to_string(),
        path: format!("lines/{line_id}"),
        component: VALIDATION_COMPONENT.to_string(),
    })
}

/// Apply line patches to an invoice snapshot, returning the desired state.
pub fn apply_line_patches(
    invoice: &Invoice,
    patches: &[LinePatch],
    deleted_at: DateTime<Utc>,
) -> Result<Invoice, SyncError> {
    let mut edited = invoice.clone();

    for patch in patches {
        let Some(line_id) = patch.line_id() else {
            continue;
        };
        let line = edited
            .lines
            .iter_mut()
            .find(|line| line.id == line_id)
            .ok_or(SyncError::LineNotFound {
                invoice_id: invoice.id,
                line_id,
            })?;

        match patch {
            LinePatch::DeleteLine { .. } => {
                if line.deleted_at.is_none() {
                    line.deleted_at = Some(deleted_at);
                }
            }
            LinePatch::UpdateLine(updated) => *line = updated.clone(),
            _ => {}
        }
    }

    Ok(edited)
}

pub struct InvoiceUpdater<'a> {
    billing: &'a dyn BillingAdapter,
}

impl<'a> InvoiceUpdater<'a> {
    pub fn new(billing: &'a dyn BillingAdapter) -> Self {
        Self { billing }
    }

    #[instrument(
        skip(self, patches),
        fields(customer_id = %customer.customer_id, patches = patches.len())
    )]
    pub async fn apply(
        &self,
        customer: &CustomerRef,
        patches: Vec<LinePatch>,
        now: DateTime<Utc>,
    ) -> Result<UpdateSummary, SyncError> {
        let mut summary = UpdateSummary::default();
        let mut creates = Vec::new();
        let mut group_patches = Vec::new();
        let mut per_invoice: BTreeMap<Uuid, Vec<LinePatch>> = BTreeMap::new();

        for patch in patches {
            record_patch(patch.kind());
            match patch {
                LinePatch::CreateLine(line) => creates.push(line),
                LinePatch::UpdateSplitGroup(_) | LinePatch::DeleteSplitGroup { .. } => {
                    group_patches.push(patch)
                }
                LinePatch::DeleteLine { .. } | LinePatch::UpdateLine(_) => {
                    if let Some(invoice_id) = patch.invoice_id() {
                        per_invoice.entry(invoice_id).or_default().push(patch);
                    }
                }
            }
        }

        if !creates.is_empty() {
            let created = self.billing.create_pending_lines(customer, creates).await?;
            summary.lines_created = created.len();
        }

        for patch in group_patches {
            match patch {
                LinePatch::UpdateSplitGroup(group) => {
                    self.billing.upsert_split_line_group(group).await?;
                    summary.split_groups_updated += 1;
                }
                LinePatch::DeleteSplitGroup { group_id } => {
                    self.billing.delete_split_line_group(group_id).await?;
                    summary.split_groups_deleted += 1;
                }
                _ => {}
            }
        }

        for (invoice_id, patches) in per_invoice {
            self.apply_to_invoice(invoice_id, &patches, now, &mut summary)
                .await?;
        }

        tracing::info!(
            lines_created = summary.lines_created,
            invoices_updated = summary.invoices_updated,
            invoices_deleted = summary.invoices_deleted,
            validation_issues_added = summary.validation_issues_added,
            "Applied line patches"
        );

        Ok(summary)
    }

    async fn apply_to_invoice(
        &self,
        invoice_id: Uuid,
        patches: &[LinePatch],
        now: DateTime<Utc>,
        summary: &mut UpdateSummary,
    ) -> Result<(), SyncError> {
        let invoice = self
            .billing
            .get_invoice(invoice_id)
            .await?
            .ok_or(SyncError::InvoiceNotFound { invoice_id })?;

        let mutability = invoice.status.mutability();
        if mutability == InvoiceMutability::Immutable {
            let issues: Vec<_> = patches.iter().filter_map(immutable_invoice_issue).collect();
            let before = invoice.validation_issues.len();

            if let Some(merged) = merge_validation_issues(&invoice.validation_issues, issues) {
                let added = merged.len() - before;
                tracing::warn!(
                    invoice_id = %invoice_id,
                    status = invoice.status.as_str(),
                    added = added,
                    "Invoice is finalized, recording validation issues instead of editing"
                );
                self.billing
                    .upsert_validation_issues(invoice_id, merged)
                    .await?;
                record_validation_issues(IMMUTABLE_INVOICE_UPDATE_CODE, added);
                summary.validation_issues_added += added;
            }
            return Ok(());
        }

        let edited = apply_line_patches(&invoice, patches, now)?;

        if !edited.has_active_lines() {
            tracing::info!(invoice_id = %invoice_id, "Invoice has no lines left, deleting");
            self.billing.delete_invoice(invoice_id).await?;
            summary.invoices_deleted += 1;
            return Ok(());
        }

        if edited == invoice {
            return Ok(());
        }

        match mutability {
            InvoiceMutability::Gathering => {
                self.billing.update_gathering_invoice(edited).await?;
            }
            _ => {
                self.billing.update_standard_invoice(edited).await?;
            }
        }
        summary.invoices_updated += 1;

        Ok(())
    }
}
