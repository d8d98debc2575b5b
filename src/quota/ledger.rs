use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::timeout;

use crate::config;
use crate::error::{AppError, AppResult};

use super::catalog::{PlanCatalog, PlanTier, QuotaLimit, ServiceType};
use super::models::{QuotaOutcome, QuotaRecord};

/// key: quota-ledger -> the only reader/writer of usage_records
///
/// Every quota decision and every limit rewrite flows through this service so
/// the check-then-increment race lives (and is fixed) in exactly one place.
#[derive(Clone)]
pub struct QuotaLedger {
    pool: PgPool,
    catalog: PlanCatalog,
}

impl QuotaLedger {
    pub fn new(pool: PgPool, catalog: PlanCatalog) -> Self {
        Self { pool, catalog }
    }

    /// The user's current tier, for seeding limits on first access.
    pub async fn current_tier(&self, user_id: i32) -> AppResult<PlanTier> {
        bounded(async {
            let tier: Option<String> =
                sqlx::query_scalar("SELECT plan_tier FROM users WHERE id = $1")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?;
            let tier = tier.ok_or(AppError::NotFound)?;
            Ok(PlanTier::parse(&tier).unwrap_or(PlanTier::Basic))
        })
        .await
    }

    /// Returns the record for (user, service), creating it with the current
    /// plan's defaults on first access. Concurrent first accesses converge on
    /// one row; the loser of the insert race reads the winner's record.
    pub async fn get_or_create(
        &self,
        user_id: i32,
        service: ServiceType,
    ) -> AppResult<QuotaRecord> {
        if let Some(record) = bounded(self.find(user_id, service)).await? {
            return Ok(record);
        }

        let tier = self.current_tier(user_id).await?;
        let limit = self.catalog.limit_for(tier, service);
        let period = self.catalog.period_for(service);
        let reset_at = period.advance(Utc::now());

        bounded(async {
            sqlx::query(
                "INSERT INTO usage_records (user_id, service_type, usage_count, limit_count, reset_interval, reset_at) \
                 VALUES ($1, $2, 0, $3, $4, $5) \
                 ON CONFLICT (user_id, service_type) DO NOTHING",
            )
            .bind(user_id)
            .bind(service.as_str())
            .bind(limit.stored())
            .bind(period.as_str())
            .bind(reset_at)
            .execute(&self.pool)
            .await?;

            self.find(user_id, service).await?.ok_or(AppError::NotFound)
        })
        .await
    }

    /// Read-only probe. Reports what a consume at this instant would see,
    /// including a due-but-unapplied reset, without mutating anything.
    pub async fn check(&self, user_id: i32, service: ServiceType) -> AppResult<QuotaOutcome> {
        let record = self.get_or_create(user_id, service).await?;
        let now = Utc::now();
        if record.reset_due(now) {
            let limit = record.limit();
            return Ok(QuotaOutcome {
                allowed: true,
                service_type: record.service_type.clone(),
                usage_count: 0,
                limit_count: limit.stored(),
                remaining_count: limit.remaining(0),
                reset_at: Some(record.period().advance(record.reset_at)),
            });
        }
        let allowed = record.limit().permits(record.usage_count);
        Ok(record.outcome(allowed))
    }

    /// The atomic admission step: apply a due reset (usage back to zero,
    /// `reset_at` advanced one period from its previous value), then either
    /// take one unit or refuse with `QuotaExceeded`. Runs under a row lock so
    /// two callers can never both take the last unit.
    pub async fn check_and_consume(
        &self,
        user_id: i32,
        service: ServiceType,
    ) -> AppResult<QuotaOutcome> {
        self.get_or_create(user_id, service).await?;

        bounded(async {
            let mut tx = self.pool.begin().await?;
            let record = sqlx::query_as::<_, QuotaRecord>(
                "SELECT * FROM usage_records WHERE user_id = $1 AND service_type = $2 FOR UPDATE",
            )
            .bind(user_id)
            .bind(service.as_str())
            .fetch_optional(&mut tx)
            .await?
            .ok_or(AppError::NotFound)?;

            let now = Utc::now();
            let (window_usage, window_reset_at) = if record.reset_due(now) {
                (0, record.period().advance(record.reset_at))
            } else {
                (record.usage_count, record.reset_at)
            };

            if !record.limit().permits(window_usage) {
                // Deny without mutating; dropping the transaction releases the
                // row lock and rolls back.
                return Err(AppError::QuotaExceeded {
                    reset_at: window_reset_at,
                });
            }

            let updated = sqlx::query_as::<_, QuotaRecord>(
                "UPDATE usage_records SET usage_count = $2, reset_at = $3, updated_at = NOW() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(record.id)
            .bind(window_usage + 1)
            .bind(window_reset_at)
            .fetch_one(&mut tx)
            .await?;
            tx.commit().await?;

            Ok(updated.outcome(true))
        })
        .await
    }

    /// Rewrites `limit_count` and nothing else; `usage_count` and `reset_at`
    /// survive. Creates the record when absent so plan transitions can fan out
    /// over the whole catalog without a prior access.
    pub async fn set_limit(
        &self,
        user_id: i32,
        service: ServiceType,
        limit: QuotaLimit,
    ) -> AppResult<QuotaRecord> {
        let period = self.catalog.period_for(service);
        let reset_at = period.advance(Utc::now());

        bounded(async {
            let result = sqlx::query_as::<_, QuotaRecord>(
                "INSERT INTO usage_records (user_id, service_type, usage_count, limit_count, reset_interval, reset_at) \
                 VALUES ($1, $2, 0, $3, $4, $5) \
                 ON CONFLICT (user_id, service_type) \
                 DO UPDATE SET limit_count = EXCLUDED.limit_count, updated_at = NOW() \
                 RETURNING *",
            )
            .bind(user_id)
            .bind(service.as_str())
            .bind(limit.stored())
            .bind(period.as_str())
            .bind(reset_at)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(record) => Ok(record),
                Err(e) => {
                    if let sqlx::Error::Database(db_err) = &e {
                        if db_err.constraint() == Some("usage_records_user_id_fkey") {
                            return Err(AppError::NotFound);
                        }
                    }
                    Err(AppError::Db(e))
                }
            }
        })
        .await
    }

    /// Administrative zeroing of the counter. `reset_at` keeps ticking on its
    /// own schedule.
    pub async fn reset_usage(&self, user_id: i32, service: ServiceType) -> AppResult<QuotaRecord> {
        bounded(async {
            sqlx::query_as::<_, QuotaRecord>(
                "UPDATE usage_records SET usage_count = 0, updated_at = NOW() \
                 WHERE user_id = $1 AND service_type = $2 RETURNING *",
            )
            .bind(user_id)
            .bind(service.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)
        })
        .await
    }

    pub async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<QuotaRecord>> {
        bounded(async {
            let records = sqlx::query_as::<_, QuotaRecord>(
                "SELECT * FROM usage_records WHERE user_id = $1 ORDER BY service_type ASC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(records)
        })
        .await
    }

    async fn find(&self, user_id: i32, service: ServiceType) -> AppResult<Option<QuotaRecord>> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            "SELECT * FROM usage_records WHERE user_id = $1 AND service_type = $2",
        )
        .bind(user_id)
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

/// Fail-closed guard around store calls: an elapsed timeout is an error,
/// never an allow.
async fn bounded<T>(fut: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    match timeout(Duration::from_millis(*config::STORE_TIMEOUT_MS), fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::StoreTimeout),
    }
}
