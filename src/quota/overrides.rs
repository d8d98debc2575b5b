use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use crate::audit::{self, QuotaEventType};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::catalog::{QuotaLimit, ServiceType};
use super::ledger::QuotaLedger;
use super::models::QuotaRecord;

/// key: admin-override-gate -> role-checked, audited limit mutations
///
/// Authorizes a role value it is handed; authentication happened upstream in
/// the extractor. Everything that passes the gate lands in the audit trail.
#[derive(Clone)]
pub struct AdminOverrideGate {
    pool: PgPool,
    ledger: QuotaLedger,
}

impl AdminOverrideGate {
    pub fn new(pool: PgPool, ledger: QuotaLedger) -> Self {
        Self { pool, ledger }
    }

    /// Plan-independent rewrite of one user's limit for one service.
    /// Unlimited arrives as the tagged variant; bounded overrides must be
    /// positive. Consumption state is untouched either way.
    pub async fn set_service_limit(
        &self,
        actor: &AuthUser,
        user_id: i32,
        service: ServiceType,
        limit: QuotaLimit,
    ) -> AppResult<QuotaRecord> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }
        if let QuotaLimit::Bounded(count) = limit {
            if count <= 0 {
                return Err(AppError::BadRequest("limit must be positive".into()));
            }
        }

        let record = self.ledger.set_limit(user_id, service, limit).await?;
        audit::record_event(
            &self.pool,
            user_id,
            Some(actor.user_id),
            QuotaEventType::LimitOverride,
            json!({ "service": service.as_str(), "limit": limit.stored() }),
        )
        .await?;
        info!(
            actor = actor.user_id,
            user_id,
            service = service.as_str(),
            "service limit overridden"
        );
        Ok(record)
    }

    /// Zero one counter on a user's behalf (support escalations). The reset
    /// schedule is not moved.
    pub async fn reset_usage(
        &self,
        actor: &AuthUser,
        user_id: i32,
        service: ServiceType,
    ) -> AppResult<QuotaRecord> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let record = self.ledger.reset_usage(user_id, service).await?;
        audit::record_event(
            &self.pool,
            user_id,
            Some(actor.user_id),
            QuotaEventType::UsageReset,
            json!({ "service": service.as_str() }),
        )
        .await?;
        info!(
            actor = actor.user_id,
            user_id,
            service = service.as_str(),
            "usage counter reset"
        );
        Ok(record)
    }
}
