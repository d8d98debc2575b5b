use anyhow::{anyhow, Result};
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::mpsc::{channel, Sender};
use tracing::{error, info};

use crate::audit::{self, QuotaEventType};

use super::catalog::PlanTier;
use super::transitions::PlanTransitionHandler;

/// key: plan-events -> background worker for payment provider callbacks
#[derive(Debug)]
pub enum PlanEventJob {
    PaymentCompleted { user_id: i32, tier: PlanTier },
}

/// key: plan-events-handle -> enqueue interface
#[derive(Clone)]
pub struct PlanEventsHandle {
    sender: Sender<PlanEventJob>,
}

impl PlanEventsHandle {
    pub async fn dispatch(&self, job: PlanEventJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow!("failed to enqueue plan event job: {err}"))
    }
}

pub fn start_plan_events_worker(
    pool: PgPool,
    transitions: PlanTransitionHandler,
) -> PlanEventsHandle {
    let (tx, mut rx) = channel(64);
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                PlanEventJob::PaymentCompleted { user_id, tier } => {
                    if let Err(err) = apply_payment(&pool, &transitions, user_id, tier).await {
                        error!(?err, %user_id, "failed to apply completed payment");
                    }
                }
            }
        }
    });

    PlanEventsHandle { sender: tx }
}

/// Applies one completed payment: move the user onto the paid tier, extend
/// the paid window by one month, and record the event with no actor.
pub async fn apply_payment(
    pool: &PgPool,
    transitions: &PlanTransitionHandler,
    user_id: i32,
    tier: PlanTier,
) -> Result<()> {
    transitions.apply_paid(user_id, tier).await?;
    audit::record_event(
        pool,
        user_id,
        None,
        QuotaEventType::PaymentCompleted,
        json!({ "tier": tier.as_str() }),
    )
    .await?;
    info!(%user_id, tier = tier.as_str(), "payment applied to plan");
    Ok(())
}
