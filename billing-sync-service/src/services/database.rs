//! Database service for billing-sync-service.

use crate::config::DatabaseConfig;
use crate::models::SyncState;
use crate::services::adapter::SyncStateStore;
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-sync-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, AppError> {
        Self::new(&config.url, config.max_connections, config.min_connections).await
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Subscriptions whose next sync is due at `now`.
    #[instrument(skip(self))]
    pub async fn list_due_subscriptions(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_due_subscriptions"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT subscription_id
            FROM subscription_sync_states
            WHERE has_billables AND next_sync_after IS NOT NULL AND next_sync_after <= $1
            ORDER BY next_sync_after
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list due subscriptions: {}", e))
        })?;

        timer.observe_duration();
        Ok(ids)
    }
}

#[async_trait]
impl SyncStateStore for Database {
    #[instrument(skip(self, state), fields(subscription_id = %state.subscription_id))]
    async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_sync_state"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO subscription_sync_states (subscription_id, has_billables, synced_at, next_sync_after)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscription_id) DO UPDATE
            SET has_billables = EXCLUDED.has_billables,
                synced_at = EXCLUDED.synced_at,
                next_sync_after = EXCLUDED.next_sync_after
            "#,
        )
        .bind(state.subscription_id)
        .bind(state.has_billables)
        .bind(state.synced_at)
        .bind(state.next_sync_after)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert sync state: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn get_sync_state(&self, subscription_id: Uuid) -> Result<Option<SyncState>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_sync_state"])
            .start_timer();

        let state = sqlx::query_as::<_, SyncState>(
            r#"
            SELECT subscription_id, has_billables, synced_at, next_sync_after
            FROM subscription_sync_states
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get sync state: {}", e)))?;

        timer.observe_duration();
        Ok(state)
    }
}
