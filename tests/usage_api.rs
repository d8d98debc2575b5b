use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde_json::json;
use sqlx::PgPool;
use usage_gate::audit::{QuotaEventFilter, QuotaEventType};
use usage_gate::error::AppError;
use usage_gate::extractor::AuthUser;
use usage_gate::quota::api::{
    check_usage, consume, list_quota_events, list_usage, payments_webhook, plan_info,
    set_service_limit, set_user_plan, LimitUpdateRequest, PaymentWebhookRequest,
    UpdatePlanRequest,
};
use usage_gate::quota::{
    start_plan_events_worker, AdmissionController, AdminOverrideGate, PlanCatalog, PlanTier,
    PlanTransitionHandler, QuotaLedger, RequestAdmissionLimiter,
};

async fn seed_user(pool: &PgPool, email: &str, role: &str, tier: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, role, plan_tier) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(email)
    .bind("hashed")
    .bind(role)
    .bind(tier)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn ledger(pool: &PgPool) -> QuotaLedger {
    QuotaLedger::new(pool.clone(), PlanCatalog)
}

fn as_user(user_id: i32) -> AuthUser {
    AuthUser {
        user_id,
        role: "user".into(),
    }
}

fn as_admin(user_id: i32) -> AuthUser {
    AuthUser {
        user_id,
        role: "admin".into(),
    }
}

// key: usage-api-tests -> endpoint behavior over seeded accounts
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn usage_listing_materializes_every_service(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let user_id = seed_user(&pool, "listing@example.com", "user", "basic").await;
    let Json(records) = list_usage(Extension(ledger(&pool)), as_user(user_id))
        .await
        .unwrap();

    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.usage_count == 0));
    let limits: Vec<(&str, Option<i64>)> = records
        .iter()
        .map(|r| (r.service_type.as_str(), r.limit_count))
        .collect();
    assert_eq!(
        limits,
        vec![
            ("ai-chat", Some(20)),
            ("code-generate", Some(15)),
            ("image-generate", Some(2)),
            ("productivity", Some(1)),
            ("sns-post", Some(10)),
            ("video-generate", Some(1)),
        ]
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn consume_endpoint_spends_and_rejects_unknown_services(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let user_id = seed_user(&pool, "spend@example.com", "user", "basic").await;
    let controller = AdmissionController::new(
        ledger(&pool),
        Arc::new(RequestAdmissionLimiter::default()),
    );

    let Json(outcome) = consume(
        Extension(controller.clone()),
        as_user(user_id),
        HeaderMap::new(),
        Path("image-generate".to_string()),
    )
    .await
    .unwrap();
    assert!(outcome.allowed);
    assert_eq!(outcome.usage_count, 1);

    let err = consume(
        Extension(controller.clone()),
        as_user(user_id),
        HeaderMap::new(),
        Path("warp-drive".to_string()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidServiceType(_)), "got {err:?}");

    let Json(probe) = check_usage(
        Extension(controller),
        as_user(user_id),
        Path("image-generate".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(probe.usage_count, 1, "probe reflects the earlier spend");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn plan_endpoint_reports_tier_catalog(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let user_id = seed_user(&pool, "planinfo@example.com", "user", "standard").await;
    let Json(response) = plan_info(Extension(ledger(&pool)), as_user(user_id))
        .await
        .unwrap();

    assert_eq!(response.tier, PlanTier::Standard);
    assert_eq!(response.services.len(), 6);
    let image = response
        .services
        .iter()
        .find(|entry| entry.service_type == "image-generate")
        .unwrap();
    assert_eq!(image.limit_count, Some(120));
    assert_eq!(image.reset_interval, "monthly");
    let productivity = response
        .services
        .iter()
        .find(|entry| entry.service_type == "productivity")
        .unwrap();
    assert_eq!(productivity.limit_count, Some(120));
    assert_eq!(productivity.reset_interval, "daily");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admin_endpoints_refuse_plain_users(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let user_id = seed_user(&pool, "plain@example.com", "user", "basic").await;
    let target_id = seed_user(&pool, "plain-target@example.com", "user", "basic").await;
    let ledger = ledger(&pool);
    let transitions = PlanTransitionHandler::new(pool.clone(), ledger.clone(), PlanCatalog);
    let gate = AdminOverrideGate::new(pool.clone(), ledger.clone());

    let err = set_user_plan(
        Extension(pool.clone()),
        Extension(transitions),
        as_user(user_id),
        Path(target_id),
        Json(UpdatePlanRequest {
            tier: PlanTier::Pro,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden), "got {err:?}");

    let payload: LimitUpdateRequest = serde_json::from_value(json!({ "limit": 10 })).unwrap();
    let err = set_service_limit(
        Extension(gate),
        as_user(user_id),
        Path((target_id, "image-generate".to_string())),
        Json(payload),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden), "got {err:?}");

    let err = list_quota_events(
        Extension(pool.clone()),
        as_user(user_id),
        Query(QuotaEventFilter::default()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden), "got {err:?}");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admin_moves_plans_and_limits_through_the_api(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let admin_id = seed_user(&pool, "api-admin@example.com", "admin", "basic").await;
    let target_id = seed_user(&pool, "api-target@example.com", "user", "basic").await;
    let ledger = ledger(&pool);
    let transitions = PlanTransitionHandler::new(pool.clone(), ledger.clone(), PlanCatalog);
    let gate = AdminOverrideGate::new(pool.clone(), ledger.clone());

    let Json(response) = set_user_plan(
        Extension(pool.clone()),
        Extension(transitions),
        as_admin(admin_id),
        Path(target_id),
        Json(UpdatePlanRequest {
            tier: PlanTier::Pro,
        }),
    )
    .await
    .unwrap();
    assert_eq!(response.tier, PlanTier::Pro);
    let tier: String = sqlx::query_scalar("SELECT plan_tier FROM users WHERE id = $1")
        .bind(target_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tier, "pro");

    // Unlimited arrives as the keyword, never as a magic count.
    let payload: LimitUpdateRequest =
        serde_json::from_value(json!({ "limit": "unlimited" })).unwrap();
    let Json(record) = set_service_limit(
        Extension(gate.clone()),
        as_admin(admin_id),
        Path((target_id, "video-generate".to_string())),
        Json(payload),
    )
    .await
    .unwrap();
    assert_eq!(record.limit_count, None);

    let payload: LimitUpdateRequest =
        serde_json::from_value(json!({ "limit": "infinite" })).unwrap();
    let err = set_service_limit(
        Extension(gate),
        as_admin(admin_id),
        Path((target_id, "video-generate".to_string())),
        Json(payload),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");

    let Json(events) = list_quota_events(
        Extension(pool.clone()),
        as_admin(admin_id),
        Query(QuotaEventFilter {
            event_type: Some(QuotaEventType::LimitOverride),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "limit_override");
    assert_eq!(events[0].actor_id, Some(admin_id));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn payment_webhook_is_acknowledged_and_applied(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let user_id = seed_user(&pool, "webhook@example.com", "user", "basic").await;
    let ledger = ledger(&pool);
    let transitions = PlanTransitionHandler::new(pool.clone(), ledger, PlanCatalog);
    let events = start_plan_events_worker(pool.clone(), transitions);

    let status = payments_webhook(
        Extension(events.clone()),
        Json(PaymentWebhookRequest {
            user_id,
            event: "payment.completed".into(),
            plan_tier: Some(PlanTier::Standard),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);

    // Application is asynchronous; poll until the worker lands it.
    let mut applied = false;
    for _ in 0..40 {
        let tier: String = sqlx::query_scalar("SELECT plan_tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        if tier == "standard" {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(applied, "worker never applied the payment");

    // Unrelated provider events are acknowledged and dropped.
    let status = payments_webhook(
        Extension(events),
        Json(PaymentWebhookRequest {
            user_id,
            event: "invoice.finalized".into(),
            plan_tier: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
}
