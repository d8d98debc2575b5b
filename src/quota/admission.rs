use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::catalog::ServiceType;
use super::ledger::QuotaLedger;
use super::limiter::RequestAdmissionLimiter;
use super::models::QuotaOutcome;

/// Per-service burst allowances. These are sized for short abuse spikes, not
/// plan enforcement; the ledger owns the plan side.
pub fn burst_preset(service: ServiceType) -> (u32, Duration) {
    match service {
        ServiceType::AiChat | ServiceType::CodeGenerate => (30, Duration::from_secs(60)),
        ServiceType::ImageGenerate | ServiceType::Productivity => (20, Duration::from_secs(60)),
        ServiceType::SnsPost => (10, Duration::from_secs(60)),
        ServiceType::VideoGenerate => (5, Duration::from_secs(300)),
    }
}

/// key: admission-controller -> burst gate in front of the durable ledger
///
/// Order is fixed: the in-process window answers first and cheaply, and the
/// ledger is only consulted (and only mutated) for requests that survive it.
/// A denial here therefore never burns quota.
#[derive(Clone)]
pub struct AdmissionController {
    ledger: QuotaLedger,
    limiter: Arc<RequestAdmissionLimiter>,
}

impl AdmissionController {
    pub fn new(ledger: QuotaLedger, limiter: Arc<RequestAdmissionLimiter>) -> Self {
        Self { ledger, limiter }
    }

    /// Full admission: burst window first, then one atomic quota unit.
    /// Admin-role callers skip the quota step but never the burst window.
    pub async fn admit(
        &self,
        client_id: &str,
        user: &AuthUser,
        service: ServiceType,
    ) -> AppResult<QuotaOutcome> {
        let (limit, window) = burst_preset(service);
        let decision = self
            .limiter
            .try_acquire(service.as_str(), client_id, limit, window);
        if !decision.allowed {
            return Err(AppError::RateLimited {
                retry_after: decision.retry_after.unwrap_or(window),
            });
        }

        if user.is_admin() {
            return Ok(QuotaOutcome::bypass(service));
        }
        self.ledger.check_and_consume(user.user_id, service).await
    }

    /// Read-only view for the usage endpoints; no window hit, no consumption.
    pub async fn probe(&self, user: &AuthUser, service: ServiceType) -> AppResult<QuotaOutcome> {
        if user.is_admin() {
            return Ok(QuotaOutcome::bypass(service));
        }
        self.ledger.check(user.user_id, service).await
    }
}
