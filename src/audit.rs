use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool, QueryBuilder};
use uuid::Uuid;

use crate::error::AppResult;

/// key: quota-audit-events -> closed set of privileged mutations worth a trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaEventType {
    LimitOverride,
    UsageReset,
    PlanTransition,
    PaymentCompleted,
    PlanExpired,
}

impl QuotaEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaEventType::LimitOverride => "limit_override",
            QuotaEventType::UsageReset => "usage_reset",
            QuotaEventType::PlanTransition => "plan_transition",
            QuotaEventType::PaymentCompleted => "payment_completed",
            QuotaEventType::PlanExpired => "plan_expired",
        }
    }
}

/// key: quota-audit-filter
/// Filter envelope applied to audit queries from the admin console.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct QuotaEventFilter {
    pub user_id: Option<i32>,
    pub event_type: Option<QuotaEventType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QuotaAuditEvent {
    pub id: Uuid,
    pub user_id: i32,
    pub actor_id: Option<i32>,
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Append one event. `actor_id` is `None` for system-driven mutations
/// (payment webhooks, the expiry scan).
pub async fn record_event(
    pool: &PgPool,
    user_id: i32,
    actor_id: Option<i32>,
    event_type: QuotaEventType,
    payload: Value,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO quota_audit_events (id, user_id, actor_id, event_type, payload) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(actor_id)
    .bind(event_type.as_str())
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn query_events(
    pool: &PgPool,
    filter: QuotaEventFilter,
) -> AppResult<Vec<QuotaAuditEvent>> {
    let mut builder = QueryBuilder::new(
        "SELECT id, user_id, actor_id, event_type, payload, occurred_at \
         FROM quota_audit_events WHERE TRUE",
    );

    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id);
    }

    if let Some(event_type) = filter.event_type {
        builder.push(" AND event_type = ");
        builder.push_bind(event_type.as_str());
    }

    if let Some(start) = filter.start {
        builder.push(" AND occurred_at >= ");
        builder.push_bind(start);
    }

    if let Some(end) = filter.end {
        builder.push(" AND occurred_at <= ");
        builder.push_bind(end);
    }

    builder.push(" ORDER BY occurred_at DESC LIMIT ");
    builder.push_bind(filter.limit.unwrap_or(100).clamp(1, 500));

    let events = builder
        .build_query_as::<QuotaAuditEvent>()
        .fetch_all(pool)
        .await?;

    Ok(events)
}
