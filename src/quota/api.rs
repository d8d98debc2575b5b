use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;

use crate::audit::{self, QuotaAuditEvent, QuotaEventFilter, QuotaEventType};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::admission::AdmissionController;
use super::catalog::{PlanCatalog, PlanTier, QuotaLimit, ServiceType};
use super::events::{PlanEventJob, PlanEventsHandle};
use super::ledger::QuotaLedger;
use super::models::{QuotaOutcome, QuotaRecord};
use super::overrides::AdminOverrideGate;
use super::transitions::PlanTransitionHandler;

/// key: quota-api -> rest endpoints
pub fn routes() -> Router {
    Router::new()
        .route("/api/usage", get(list_usage))
        .route("/api/usage/:service", get(check_usage))
        .route("/api/usage/:service/consume", post(consume))
        .route("/api/plan", get(plan_info))
        .route("/api/admin/users/:id/plan", put(set_user_plan))
        .route("/api/admin/users/:id/limits/:service", put(set_service_limit))
        .route(
            "/api/admin/users/:id/usage/:service/reset",
            post(reset_user_usage),
        )
        .route("/api/admin/usage/:id", get(list_user_usage))
        .route("/api/admin/quota/events", get(list_quota_events))
        .route("/api/webhooks/payments", post(payments_webhook))
}

fn parse_service(raw: &str) -> AppResult<ServiceType> {
    ServiceType::parse(raw).ok_or_else(|| AppError::InvalidServiceType(raw.to_string()))
}

/// Burst windows key on the calling client, not the account. Proxies hand us
/// the originating address in headers; the account id stands in when neither
/// header is present.
fn client_key(headers: &HeaderMap, user: &AuthUser) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    format!("user-{}", user.user_id)
}

pub async fn list_usage(
    Extension(ledger): Extension<QuotaLedger>,
    user: AuthUser,
) -> AppResult<Json<Vec<QuotaRecord>>> {
    // Materialize missing rows so a fresh account still sees every service.
    for service in ServiceType::ALL {
        ledger.get_or_create(user.user_id, service).await?;
    }
    let records = ledger.list_for_user(user.user_id).await?;
    Ok(Json(records))
}

pub async fn check_usage(
    Extension(controller): Extension<AdmissionController>,
    user: AuthUser,
    Path(service): Path<String>,
) -> AppResult<Json<QuotaOutcome>> {
    let service = parse_service(&service)?;
    let outcome = controller.probe(&user, service).await?;
    Ok(Json(outcome))
}

pub async fn consume(
    Extension(controller): Extension<AdmissionController>,
    user: AuthUser,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> AppResult<Json<QuotaOutcome>> {
    let service = parse_service(&service)?;
    let client = client_key(&headers, &user);
    let outcome = controller.admit(&client, &user, service).await?;
    Ok(Json(outcome))
}

pub async fn plan_info(
    Extension(ledger): Extension<QuotaLedger>,
    user: AuthUser,
) -> AppResult<Json<PlanInfoResponse>> {
    let tier = ledger.current_tier(user.user_id).await?;
    Ok(Json(plan_response(tier)))
}

pub async fn set_user_plan(
    Extension(pool): Extension<PgPool>,
    Extension(transitions): Extension<PlanTransitionHandler>,
    actor: AuthUser,
    Path(user_id): Path<i32>,
    Json(payload): Json<UpdatePlanRequest>,
) -> AppResult<Json<PlanInfoResponse>> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden);
    }
    transitions.apply(user_id, payload.tier).await?;
    audit::record_event(
        &pool,
        user_id,
        Some(actor.user_id),
        QuotaEventType::PlanTransition,
        json!({ "tier": payload.tier.as_str() }),
    )
    .await?;
    Ok(Json(plan_response(payload.tier)))
}

pub async fn set_service_limit(
    Extension(gate): Extension<AdminOverrideGate>,
    actor: AuthUser,
    Path((user_id, service)): Path<(i32, String)>,
    Json(payload): Json<LimitUpdateRequest>,
) -> AppResult<Json<QuotaRecord>> {
    let service = parse_service(&service)?;
    let limit = payload.limit.into_limit()?;
    let record = gate
        .set_service_limit(&actor, user_id, service, limit)
        .await?;
    Ok(Json(record))
}

pub async fn reset_user_usage(
    Extension(gate): Extension<AdminOverrideGate>,
    actor: AuthUser,
    Path((user_id, service)): Path<(i32, String)>,
) -> AppResult<Json<QuotaRecord>> {
    let service = parse_service(&service)?;
    let record = gate.reset_usage(&actor, user_id, service).await?;
    Ok(Json(record))
}

pub async fn list_user_usage(
    Extension(ledger): Extension<QuotaLedger>,
    actor: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<QuotaRecord>>> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden);
    }
    let records = ledger.list_for_user(user_id).await?;
    Ok(Json(records))
}

pub async fn list_quota_events(
    Extension(pool): Extension<PgPool>,
    actor: AuthUser,
    Query(filter): Query<QuotaEventFilter>,
) -> AppResult<Json<Vec<QuotaAuditEvent>>> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden);
    }
    let events = audit::query_events(&pool, filter).await?;
    Ok(Json(events))
}

/// key: quota-webhooks -> payment provider entrypoint
pub async fn payments_webhook(
    Extension(events): Extension<PlanEventsHandle>,
    Json(payload): Json<PaymentWebhookRequest>,
) -> Result<StatusCode, StatusCode> {
    match (payload.event.as_str(), payload.plan_tier) {
        ("payment.completed" | "subscription.renewed", Some(tier)) => {
            events
                .dispatch(PlanEventJob::PaymentCompleted {
                    user_id: payload.user_id,
                    tier,
                })
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(StatusCode::ACCEPTED)
        }
        ("payment.completed" | "subscription.renewed", None) => Err(StatusCode::BAD_REQUEST),
        _ => Ok(StatusCode::ACCEPTED),
    }
}

fn plan_response(tier: PlanTier) -> PlanInfoResponse {
    let catalog = PlanCatalog;
    let services = catalog
        .tier_limits(tier)
        .into_iter()
        .map(|(service, limit)| PlanEntry {
            service_type: service.as_str().to_string(),
            limit_count: limit.stored(),
            reset_interval: catalog.period_for(service).as_str().to_string(),
        })
        .collect();
    PlanInfoResponse { tier, services }
}

#[derive(Debug, Serialize)]
pub struct PlanInfoResponse {
    pub tier: PlanTier,
    pub services: Vec<PlanEntry>,
}

#[derive(Debug, Serialize)]
pub struct PlanEntry {
    pub service_type: String,
    pub limit_count: Option<i64>,
    pub reset_interval: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub tier: PlanTier,
}

#[derive(Debug, Deserialize)]
pub struct LimitUpdateRequest {
    pub limit: LimitValue,
}

/// Accepts `{"limit": 50}` or `{"limit": "unlimited"}`. Unlimited is always
/// the explicit keyword, never a sentinel count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LimitValue {
    Count(i64),
    Keyword(String),
}

impl LimitValue {
    fn into_limit(self) -> AppResult<QuotaLimit> {
        match self {
            LimitValue::Count(count) => Ok(QuotaLimit::Bounded(count)),
            LimitValue::Keyword(word) if word == "unlimited" => Ok(QuotaLimit::Unlimited),
            LimitValue::Keyword(word) => Err(AppError::BadRequest(format!(
                "unrecognized limit value: {word}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub user_id: i32,
    pub event: String,
    #[serde(default)]
    pub plan_tier: Option<PlanTier>,
}
