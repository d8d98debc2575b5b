use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// key: plan-catalog -> closed tier/service sets and the one authoritative limit table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Standard,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Standard => "standard",
            PlanTier::Pro => "pro",
        }
    }

    pub fn parse(value: &str) -> Option<PlanTier> {
        match value {
            "basic" => Some(PlanTier::Basic),
            "standard" => Some(PlanTier::Standard),
            "pro" => Some(PlanTier::Pro),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "image-generate")]
    ImageGenerate,
    #[serde(rename = "video-generate")]
    VideoGenerate,
    #[serde(rename = "ai-chat")]
    AiChat,
    #[serde(rename = "code-generate")]
    CodeGenerate,
    #[serde(rename = "sns-post")]
    SnsPost,
    #[serde(rename = "productivity")]
    Productivity,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::ImageGenerate,
        ServiceType::VideoGenerate,
        ServiceType::AiChat,
        ServiceType::CodeGenerate,
        ServiceType::SnsPost,
        ServiceType::Productivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ImageGenerate => "image-generate",
            ServiceType::VideoGenerate => "video-generate",
            ServiceType::AiChat => "ai-chat",
            ServiceType::CodeGenerate => "code-generate",
            ServiceType::SnsPost => "sns-post",
            ServiceType::Productivity => "productivity",
        }
    }

    pub fn parse(value: &str) -> Option<ServiceType> {
        match value {
            "image-generate" => Some(ServiceType::ImageGenerate),
            "video-generate" => Some(ServiceType::VideoGenerate),
            "ai-chat" => Some(ServiceType::AiChat),
            "code-generate" => Some(ServiceType::CodeGenerate),
            "sns-post" => Some(ServiceType::SnsPost),
            "productivity" => Some(ServiceType::Productivity),
            _ => None,
        }
    }
}

/// A per-service quota ceiling. Unlimited is a real variant, never a large
/// numeric stand-in, so admission math can special-case it safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Unlimited,
    Bounded(i64),
}

impl QuotaLimit {
    /// Storage form: `NULL` limit columns mean unlimited.
    pub fn from_stored(stored: Option<i64>) -> QuotaLimit {
        match stored {
            Some(count) => QuotaLimit::Bounded(count),
            None => QuotaLimit::Unlimited,
        }
    }

    pub fn stored(self) -> Option<i64> {
        match self {
            QuotaLimit::Bounded(count) => Some(count),
            QuotaLimit::Unlimited => None,
        }
    }

    pub fn permits(self, used: i64) -> bool {
        match self {
            QuotaLimit::Unlimited => true,
            QuotaLimit::Bounded(count) => used < count,
        }
    }

    pub fn remaining(self, used: i64) -> Option<i64> {
        match self {
            QuotaLimit::Unlimited => None,
            QuotaLimit::Bounded(count) => Some((count - used).max(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPeriod {
    Daily,
    Monthly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Daily => "daily",
            ResetPeriod::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> ResetPeriod {
        match value {
            "daily" => ResetPeriod::Daily,
            _ => ResetPeriod::Monthly,
        }
    }

    /// One single step forward from `from`, never a catch-up over elapsed periods.
    pub fn advance(self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ResetPeriod::Daily => from + Duration::days(1),
            ResetPeriod::Monthly => from
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| from + Duration::days(30)),
        }
    }
}

/// key: plan-catalog -> limit lookup
///
/// Every limit the subsystem hands out originates here; route handlers, the
/// ledger, and plan transitions all read the same table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanCatalog;

impl PlanCatalog {
    pub fn limit_for(&self, tier: PlanTier, service: ServiceType) -> QuotaLimit {
        let count = match service {
            ServiceType::ImageGenerate => match tier {
                PlanTier::Basic => 2,
                PlanTier::Standard => 120,
                PlanTier::Pro => 300,
            },
            ServiceType::VideoGenerate => match tier {
                PlanTier::Basic => 1,
                PlanTier::Standard => 20,
                PlanTier::Pro => 45,
            },
            ServiceType::Productivity => match tier {
                PlanTier::Basic => 1,
                PlanTier::Standard => 120,
                PlanTier::Pro => 250,
            },
            // Flat across tiers; the product never varied these by plan.
            ServiceType::AiChat => 20,
            ServiceType::CodeGenerate => 15,
            ServiceType::SnsPost => 10,
        };
        QuotaLimit::Bounded(count)
    }

    pub fn period_for(&self, service: ServiceType) -> ResetPeriod {
        match service {
            ServiceType::Productivity => ResetPeriod::Daily,
            _ => ResetPeriod::Monthly,
        }
    }

    /// All per-service limits for a tier, in `ServiceType::ALL` order.
    pub fn tier_limits(&self, tier: PlanTier) -> Vec<(ServiceType, QuotaLimit)> {
        ServiceType::ALL
            .iter()
            .map(|service| (*service, self.limit_for(tier, *service)))
            .collect()
    }
}
