pub mod admission;
pub mod api;
pub mod catalog;
pub mod events;
pub mod ledger;
pub mod limiter;
pub mod models;
pub mod overrides;
pub mod scheduler;
pub mod transitions;

pub use admission::{burst_preset, AdmissionController};
pub use catalog::{PlanCatalog, PlanTier, QuotaLimit, ResetPeriod, ServiceType};
pub use events::{apply_payment, start_plan_events_worker, PlanEventJob, PlanEventsHandle};
pub use ledger::QuotaLedger;
pub use limiter::{RateDecision, RequestAdmissionLimiter};
pub use models::{QuotaOutcome, QuotaRecord};
pub use overrides::AdminOverrideGate;
pub use scheduler::{process_tick as run_plan_expiry_tick, spawn as spawn_quota_scheduler};
pub use transitions::PlanTransitionHandler;
