//! Services module for billing-sync-service.

pub mod adapter;
pub mod database;
pub mod memory;
pub mod metrics;

pub use adapter::{BillingAdapter, CustomerLock, SubscriptionSource, SyncStateStore};
pub use database::Database;
pub use memory::{InMemoryBilling, InMemorySubscriptions, InMemorySyncStates};
pub use metrics::{
    get_metrics, init_metrics, record_generator_safety_cap, record_patch, record_sync_run,
    record_validation_issues, start_sync_run_timer,
};
