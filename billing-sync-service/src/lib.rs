//! Subscription-to-invoice synchronization engine.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;

pub use error::SyncError;

use service_core::config::ObservabilityConfig;
use service_core::error::AppError;

/// Register the sync metrics and install the global tracing subscriber.
///
/// Metrics are registered even when a subscriber is already installed, in
/// which case the tracing error is returned.
pub fn init_observability(config: &ObservabilityConfig) -> Result<(), AppError> {
    services::init_metrics();
    service_core::observability::init_tracing(config)?;
    tracing::info!(service = %config.service_name, "Observability initialized");
    Ok(())
}
