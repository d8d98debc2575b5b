use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use crate::error::{AppError, AppResult};

use super::catalog::{PlanCatalog, PlanTier, ResetPeriod};
use super::ledger::QuotaLedger;

/// key: plan-transitions -> tier changes rewrite limits, never consumption
#[derive(Clone)]
pub struct PlanTransitionHandler {
    pool: PgPool,
    ledger: QuotaLedger,
    catalog: PlanCatalog,
}

impl PlanTransitionHandler {
    pub fn new(pool: PgPool, ledger: QuotaLedger, catalog: PlanCatalog) -> Self {
        Self {
            pool,
            ledger,
            catalog,
        }
    }

    /// Persists `new_tier` on the user and fans the catalog's limits out over
    /// every service. `usage_count` and `reset_at` survive untouched: an
    /// upgrade mid-window keeps what was already consumed. Re-applying the
    /// same tier (a duplicated webhook, a retried admin call) converges on the
    /// same end state; a partial failure is safe to retry rather than rolled
    /// back across records.
    pub async fn apply(&self, user_id: i32, new_tier: PlanTier) -> AppResult<()> {
        let updated = sqlx::query("UPDATE users SET plan_tier = $2 WHERE id = $1")
            .bind(user_id)
            .bind(new_tier.as_str())
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        for (service, limit) in self.catalog.tier_limits(new_tier) {
            self.ledger.set_limit(user_id, service, limit).await?;
        }

        info!(user_id, tier = new_tier.as_str(), "plan transition applied");
        Ok(())
    }

    /// Transition driven by a completed payment: the tier change plus a fresh
    /// one-month expiry horizon (cleared again for the free tier).
    pub async fn apply_paid(&self, user_id: i32, tier: PlanTier) -> AppResult<()> {
        self.apply(user_id, tier).await?;

        let expires_at = match tier {
            PlanTier::Basic => None,
            _ => Some(ResetPeriod::Monthly.advance(Utc::now())),
        };
        sqlx::query("UPDATE users SET plan_expires_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Downgrade for a lapsed paid plan. Modeled as applying Basic, not as a
    /// special delete path; clears the expiry marker so the scan moves on.
    pub async fn expire_to_basic(&self, user_id: i32) -> AppResult<()> {
        self.apply(user_id, PlanTier::Basic).await?;
        sqlx::query("UPDATE users SET plan_expires_at = NULL WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
