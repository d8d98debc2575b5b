use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::catalog::{QuotaLimit, ResetPeriod, ServiceType};

/// key: quota-models -> one durable counter per (user, service)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuotaRecord {
    pub id: i64,
    pub user_id: i32,
    pub service_type: String,
    pub usage_count: i64,
    pub limit_count: Option<i64>,
    pub reset_interval: String,
    pub reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    pub fn limit(&self) -> QuotaLimit {
        QuotaLimit::from_stored(self.limit_count)
    }

    pub fn period(&self) -> ResetPeriod {
        ResetPeriod::parse(&self.reset_interval)
    }

    pub fn reset_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    pub fn outcome(&self, allowed: bool) -> QuotaOutcome {
        QuotaOutcome {
            allowed,
            service_type: self.service_type.clone(),
            usage_count: self.usage_count,
            limit_count: self.limit_count,
            remaining_count: self.limit().remaining(self.usage_count),
            reset_at: Some(self.reset_at),
        }
    }
}

/// key: quota-models -> admission outcome handed back to route handlers
///
/// `limit_count`/`remaining_count` are `None` for unlimited records, matching
/// the stored form. `reset_at` is `None` only for role-based bypass outcomes,
/// which never touch a stored record.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaOutcome {
    pub allowed: bool,
    pub service_type: String,
    pub usage_count: i64,
    pub limit_count: Option<i64>,
    pub remaining_count: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl QuotaOutcome {
    /// Outcome for callers whose role exempts them from plan quotas. Nothing
    /// was read or consumed.
    pub fn bypass(service: ServiceType) -> Self {
        Self {
            allowed: true,
            service_type: service.as_str().to_string(),
            usage_count: 0,
            limit_count: None,
            remaining_count: None,
            reset_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(usage: i64, limit: Option<i64>) -> QuotaRecord {
        let now = Utc::now();
        QuotaRecord {
            id: 1,
            user_id: 7,
            service_type: "image-generate".to_string(),
            usage_count: usage,
            limit_count: limit,
            reset_interval: "monthly".to_string(),
            reset_at: now + Duration::days(3),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn outcome_reports_remaining_for_bounded_records() {
        let outcome = record(1, Some(2)).outcome(true);
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining_count, Some(1));
        assert_eq!(outcome.limit_count, Some(2));
    }

    #[test]
    fn outcome_has_no_remaining_for_unlimited_records() {
        let outcome = record(500, None).outcome(true);
        assert_eq!(outcome.limit_count, None);
        assert_eq!(outcome.remaining_count, None);
    }

    #[test]
    fn reset_due_compares_against_reset_at() {
        let rec = record(0, Some(2));
        assert!(!rec.reset_due(Utc::now()));
        assert!(rec.reset_due(rec.reset_at));
        assert!(rec.reset_due(rec.reset_at + Duration::days(90)));
    }

    #[test]
    fn bypass_outcome_carries_no_schedule() {
        let outcome = QuotaOutcome::bypass(ServiceType::VideoGenerate);
        assert!(outcome.allowed);
        assert_eq!(outcome.service_type, "video-generate");
        assert_eq!(outcome.limit_count, None);
        assert_eq!(outcome.reset_at, None);
    }
}
