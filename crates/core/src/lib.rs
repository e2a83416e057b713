pub mod audit;
pub mod breaker;
pub mod config;
pub mod domain;
pub mod errors;
pub mod guardrails;
pub mod jobs;

pub use audit::{AuditEvent, AuditLog, AuditLogError, AuditOutcome, InMemoryAuditLog};
pub use breaker::{
    BreakerAvailability, BreakerConfig, BreakerPolicy, BreakerSnapshot, BreakerState,
};
pub use domain::job::{BackgroundJob, JobId, JobStatus};
pub use domain::recommendation::{parse_savings, ActionMapper, Recommendation};
pub use domain::remediation::{
    truncate_error, CloudProvider, RemediationAction, RemediationRequest, RemediationStatus,
    RequestId, ResourceId,
};
pub use domain::tenant::{TenantId, TenantSettings};
pub use errors::DomainError;
pub use guardrails::{GuardrailVeto, KillSwitchPolicy, MonthlyCapPolicy};
pub use jobs::{FailureKind, JobLifecycle, JobLifecycleConfig, JobStateError};
