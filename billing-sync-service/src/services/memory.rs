//! In-memory collaborators.
//!
//! Used by the test suite and for local runs without a billing backend. Data
//! lives behind an `Arc`, so clones share state.

use crate::models::{
    Annotations, CustomerRef, ExistingLine, Invoice, InvoiceMutability, InvoiceStatus,
    InvoicedLine, Line, ManagedBy, PendingLine, SplitLineGroup, SplitLineHierarchy,
    SubscriptionView, SyncState, ValidationIssue,
};
use crate::services::adapter::{BillingAdapter, CustomerLock, SubscriptionSource, SyncStateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use uuid::Uuid;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn invoice_not_found(invoice_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("invoice {} not found", invoice_id))
}

fn belongs_to(invoice: &Invoice, customer: &CustomerRef) -> bool {
    invoice.namespace == customer.namespace && invoice.customer_id == customer.customer_id
}

#[derive(Default, Clone)]
pub struct InMemoryBilling {
    inner: Arc<InMemoryBillingInner>,
}

#[derive(Default)]
struct InMemoryBillingInner {
    invoices: RwLock<HashMap<Uuid, Invoice>>,
    split_line_groups: RwLock<HashMap<Uuid, SplitLineGroup>>,
    customer_locks: DashMap<CustomerRef, Arc<Mutex<()>>>,
}

impl InMemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite an invoice.
    pub fn insert_invoice(&self, invoice: Invoice) {
        write(&self.inner.invoices).insert(invoice.id, invoice);
    }

    /// Seed or overwrite a split-line group.
    pub fn insert_split_line_group(&self, group: SplitLineGroup) {
        write(&self.inner.split_line_groups).insert(group.id, group);
    }

    pub fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        read(&self.inner.invoices).get(&invoice_id).cloned()
    }

    pub fn split_line_group(&self, group_id: Uuid) -> Option<SplitLineGroup> {
        read(&self.inner.split_line_groups).get(&group_id).cloned()
    }

    /// All invoices, oldest first.
    pub fn invoices(&self) -> Vec<Invoice> {
        let mut invoices: Vec<_> = read(&self.inner.invoices).values().cloned().collect();
        invoices.sort_by_key(|invoice| (invoice.created_at, invoice.id));
        invoices
    }

    fn replace_invoice(
        &self,
        invoice: Invoice,
        allowed: InvoiceMutability,
    ) -> Result<Invoice, AppError> {
        let mut invoices = write(&self.inner.invoices);
        let current = invoices
            .get(&invoice.id)
            .ok_or_else(|| invoice_not_found(invoice.id))?;

        if current.status.mutability() != allowed || invoice.status != current.status {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "invoice {} is {}, refusing edit",
                invoice.id,
                current.status.as_str()
            )));
        }

        invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }
}

#[async_trait]
impl BillingAdapter for InMemoryBilling {
    async fn lock_customer(&self, customer: &CustomerRef) -> Result<CustomerLock, AppError> {
        let mutex = self
            .inner
            .customer_locks
            .entry(customer.clone())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        Ok(CustomerLock::new(customer.clone(), guard))
    }

    async fn list_invoices(&self, customer: &CustomerRef) -> Result<Vec<Invoice>, AppError> {
        Ok(self
            .invoices()
            .into_iter()
            .filter(|invoice| belongs_to(invoice, customer))
            .collect())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.invoice(invoice_id))
    }

    async fn list_subscription_lines(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<ExistingLine>, AppError> {
        let invoices = read(&self.inner.invoices);
        let groups = read(&self.inner.split_line_groups);

        let mut existing = Vec::new();
        let mut grouped: HashMap<Uuid, Vec<InvoicedLine>> = HashMap::new();

        for invoice in invoices.values() {
            for line in &invoice.lines {
                let referenced = line
                    .subscription
                    .is_some_and(|reference| reference.subscription_id == subscription_id);
                if !referenced {
                    continue;
                }

                let invoiced = InvoicedLine {
                    line: line.clone(),
                    invoice_status: invoice.status,
                };
                match line.split_line_group_id {
                    Some(group_id) => grouped.entry(group_id).or_default().push(invoiced),
                    None => existing.push(ExistingLine::Line(invoiced)),
                }
            }
        }

        for (group_id, mut lines) in grouped {
            let group = groups.get(&group_id).cloned().ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "split line group {} referenced by a line does not exist",
                    group_id
                ))
            })?;
            lines.sort_by_key(|child| child.line.period.from);
            existing.push(ExistingLine::Hierarchy(SplitLineHierarchy { group, lines }));
        }

        existing.sort_by(|a, b| a.unique_reference_id().cmp(&b.unique_reference_id()));
        Ok(existing)
    }

    async fn create_pending_lines(
        &self,
        customer: &CustomerRef,
        lines: Vec<PendingLine>,
    ) -> Result<Vec<Line>, AppError> {
        let mut invoices = write(&self.inner.invoices);
        let mut created = Vec::with_capacity(lines.len());

        for pending in lines {
            let gathering = invoices
                .values()
                .find(|invoice| {
                    invoice.status.is_gathering()
                        && belongs_to(invoice, customer)
                        && invoice.currency == pending.currency
                })
                .map(|invoice| invoice.id);

            let invoice_id = match gathering {
                Some(invoice_id) => invoice_id,
                None => {
                    let invoice = Invoice {
                        id: Uuid::new_v4(),
                        namespace: customer.namespace.clone(),
                        customer_id: customer.customer_id,
                        currency: pending.currency.clone(),
                        status: InvoiceStatus::Gathering,
                        lines: Vec::new(),
                        validation_issues: Vec::new(),
                        created_at: Utc::now(),
                    };
                    let invoice_id = invoice.id;
                    invoices.insert(invoice_id, invoice);
                    invoice_id
                }
            };

            let line = Line {
                id: Uuid::new_v4(),
                invoice_id,
                namespace: pending.namespace,
                customer_id: pending.customer_id,
                name: pending.name,
                currency: pending.currency,
                feature_key: pending.feature_key,
                period: pending.period,
                invoice_at: pending.invoice_at,
                price: pending.price,
                managed_by: ManagedBy::Subscription,
                annotations: Annotations::new(),
                child_unique_reference_id: Some(pending.child_unique_reference_id),
                subscription: Some(pending.subscription),
                split_line_group_id: None,
                deleted_at: None,
            };

            if let Some(invoice) = invoices.get_mut(&invoice_id) {
                invoice.lines.push(line.clone());
            }
            created.push(line);
        }

        Ok(created)
    }

    async fn update_gathering_invoice(&self, invoice: Invoice) -> Result<Invoice, AppError> {
        self.replace_invoice(invoice, InvoiceMutability::Gathering)
    }

    async fn update_standard_invoice(&self, invoice: Invoice) -> Result<Invoice, AppError> {
        self.replace_invoice(invoice, InvoiceMutability::Mutable)
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), AppError> {
        let mut invoices = write(&self.inner.invoices);
        let invoice = invoices
            .get(&invoice_id)
            .ok_or_else(|| invoice_not_found(invoice_id))?;

        if invoice.status.mutability() == InvoiceMutability::Immutable {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "invoice {} is {} and cannot be deleted",
                invoice_id,
                invoice.status.as_str()
            )));
        }

        invoices.remove(&invoice_id);
        Ok(())
    }

    async fn upsert_split_line_group(
        &self,
        group: SplitLineGroup,
    ) -> Result<SplitLineGroup, AppError> {
        write(&self.inner.split_line_groups).insert(group.id, group.clone());
        Ok(group)
    }

    async fn delete_split_line_group(&self, group_id: Uuid) -> Result<(), AppError> {
        let mut groups = write(&self.inner.split_line_groups);
        let group = groups.get_mut(&group_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("split line group {} not found", group_id))
        })?;
        if group.deleted_at.is_none() {
            group.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn upsert_validation_issues(
        &self,
        invoice_id: Uuid,
        issues: Vec<ValidationIssue>,
    ) -> Result<(), AppError> {
        let mut invoices = write(&self.inner.invoices);
        let invoice = invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        invoice.validation_issues = issues;
        Ok(())
    }

    async fn invoice_pending_lines(
        &self,
        customer: &CustomerRef,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, AppError> {
        let mut invoices = write(&self.inner.invoices);

        let mut gathering_ids: Vec<_> = invoices
            .values()
            .filter(|invoice| invoice.status.is_gathering() && belongs_to(invoice, customer))
            .map(|invoice| (invoice.created_at, invoice.id))
            .collect();
        gathering_ids.sort();

        let mut issued = Vec::new();

        for (_, gathering_id) in gathering_ids {
            let Some(gathering) = invoices.get_mut(&gathering_id) else {
                continue;
            };

            let (due, pending): (Vec<Line>, Vec<Line>) = gathering
                .lines
                .drain(..)
                .partition(|line| !line.is_deleted() && line.invoice_at <= as_of);
            gathering.lines = pending;

            if due.is_empty() {
                continue;
            }

            let invoice_id = Uuid::new_v4();
            let invoice = Invoice {
                id: invoice_id,
                namespace: gathering.namespace.clone(),
                customer_id: gathering.customer_id,
                currency: gathering.currency.clone(),
                status: InvoiceStatus::Draft,
                lines: due
                    .into_iter()
                    .map(|mut line| {
                        line.invoice_id = invoice_id;
                        line
                    })
                    .collect(),
                validation_issues: Vec::new(),
                created_at: Utc::now(),
            };

            tracing::info!(
                invoice_id = %invoice_id,
                lines = invoice.lines.len(),
                "Invoiced pending lines"
            );
            invoices.insert(invoice_id, invoice.clone());
            issued.push(invoice);
        }

        Ok(issued)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySubscriptions {
    views: Arc<RwLock<HashMap<Uuid, SubscriptionView>>>,
}

impl InMemorySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, view: SubscriptionView) {
        write(&self.views).insert(view.id, view);
    }
}

#[async_trait]
impl SubscriptionSource for InMemorySubscriptions {
    async fn get_view(&self, subscription_id: Uuid) -> Result<Option<SubscriptionView>, AppError> {
        Ok(read(&self.views).get(&subscription_id).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemorySyncStates {
    states: Arc<RwLock<HashMap<Uuid, SyncState>>>,
}

impl InMemorySyncStates {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateStore for InMemorySyncStates {
    async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        write(&self.states).insert(state.subscription_id, state.clone());
        Ok(())
    }

    async fn get_sync_state(&self, subscription_id: Uuid) -> Result<Option<SyncState>, AppError> {
        Ok(read(&self.states).get(&subscription_id).cloned())
    }
}
