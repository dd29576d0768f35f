//! Domain models for billing-sync-service.

mod cadence;
mod invoice;
mod line;
mod period;
mod subscription;
mod sync_state;

pub use cadence::{Cadence, CadenceParseError};
pub use invoice::{
    merge_validation_issues, Invoice, InvoiceMutability, InvoiceStatus, Severity,
    ValidationIssue,
};
pub use line::{
    Annotations, ExistingLine, InvoicedLine, Line, LinePrice, ManagedBy, PendingLine,
    SplitLineGroup, SplitLineHierarchy, SubscriptionReference, ANNOTATION_FORCE_CONTINUOUS,
    ANNOTATION_SYNC_IGNORE,
};
pub use period::{
    meter_resolution, truncate_timestamp, ActiveWindow, Period, METER_RESOLUTION_SECS,
};
pub use subscription::{
    CustomerRef, FlatPrice, ItemVersion, PaymentTerm, PhaseView, Price, ProrationConfig,
    RateCard, SubscriptionView, UsagePrice,
};
pub use sync_state::SyncState;
