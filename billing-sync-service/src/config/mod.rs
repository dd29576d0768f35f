use service_core::config::ObservabilityConfig;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub observability: ObservabilityConfig,
    pub database: DatabaseConfig,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Invoice pending lines that are due right after a sync tick.
    pub invoice_pending_lines_on_sync: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            invoice_pending_lines_on_sync: true,
        }
    }
}

impl SyncSettings {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let invoice_pending_lines_on_sync = parse_or(lookup, "SYNC_INVOICE_PENDING_LINES", true)?;
        Ok(Self {
            invoice_pending_lines_on_sync,
        })
    }
}

impl DatabaseConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL must be set")))?;

        Ok(Self {
            url,
            max_connections: parse_or(lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            min_connections: parse_or(lookup, "DATABASE_MIN_CONNECTIONS", 2)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

impl SyncServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let observability = ObservabilityConfig::load()?;
        let lookup = |key: &str| env::var(key).ok();

        Ok(Self {
            observability,
            database: DatabaseConfig::from_lookup(&lookup)?,
            sync: SyncSettings::from_lookup(&lookup)?,
        })
    }
}
