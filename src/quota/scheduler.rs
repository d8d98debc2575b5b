use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{info, warn};

use crate::audit::{self, QuotaEventType};
use crate::config;

use super::limiter::RequestAdmissionLimiter;
use super::transitions::PlanTransitionHandler;

/// key: quota-scheduler -> plan expiry scan and limiter upkeep
pub fn spawn(
    pool: PgPool,
    limiter: Arc<RequestAdmissionLimiter>,
    transitions: PlanTransitionHandler,
) {
    let expiry_interval = TokioDuration::from_secs(*config::PLAN_EXPIRY_SCAN_INTERVAL_SECS);
    tokio::spawn(async move {
        let mut ticker = time::interval(expiry_interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if let Err(err) = process_tick(&pool, now, &transitions).await {
                warn!(?err, "plan expiry scan tick failed");
            }
        }
    });

    let sweep_interval = TokioDuration::from_secs(*config::LIMITER_SWEEP_INTERVAL_SECS);
    tokio::spawn(async move {
        let mut ticker = time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            limiter.sweep();
        }
    });
}

/// key: quota-scheduler -> expiry tick handler
///
/// Downgrades every paid plan whose expiry horizon has passed. Each user is
/// handled independently so one failure never blocks the rest of the scan.
pub async fn process_tick(
    pool: &PgPool,
    now: DateTime<Utc>,
    transitions: &PlanTransitionHandler,
) -> Result<()> {
    let lapsed = sqlx::query_as::<_, LapsedPlan>(
        "SELECT id, plan_tier FROM users \
         WHERE plan_tier <> 'basic' AND plan_expires_at IS NOT NULL AND plan_expires_at <= $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    for record in lapsed {
        match transitions.expire_to_basic(record.id).await {
            Ok(()) => {
                if let Err(err) = audit::record_event(
                    pool,
                    record.id,
                    None,
                    QuotaEventType::PlanExpired,
                    json!({ "from_tier": record.plan_tier }),
                )
                .await
                {
                    warn!(?err, user_id = record.id, "failed to record plan expiry");
                }
                info!(
                    user_id = record.id,
                    from_tier = %record.plan_tier,
                    "lapsed paid plan downgraded"
                );
            }
            Err(err) => warn!(
                ?err,
                user_id = record.id,
                "failed to downgrade lapsed plan"
            ),
        }
    }

    Ok(())
}

#[derive(Debug, FromRow)]
struct LapsedPlan {
    id: i32,
    plan_tier: String,
}
