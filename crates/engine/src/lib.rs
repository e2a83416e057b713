pub mod autopilot;
pub mod breaker;
pub mod cloud;
pub mod guardrails;
pub mod jobs;
pub mod notify;
pub mod scheduler;
pub mod workflow;

pub use autopilot::{
    AnalysisError, AnalysisSource, AutopilotConfig, AutopilotSummary, InMemoryAnalysisSource,
    SavingsAutopilot,
};
pub use breaker::BreakerService;
pub use cloud::{
    CachingCredentialProvider, CloudActionError, CloudActionExecutor, CredentialError,
    CredentialProvider, RecordingExecutor, TemporaryCredentials, UnconfiguredExecutor,
};
pub use guardrails::{CostSource, CostSourceError, GuardrailError, GuardrailService, InMemoryCostSource};
pub use jobs::{JobBatchSummary, JobFailure, JobHandler, JobRunError, JobRunner};
pub use notify::{InMemoryNotifier, LogNotifier, Notification, Notifier, NotifyError};
pub use scheduler::{Scheduler, SchedulerSettings, TickReport};
pub use workflow::{
    CreateRequestInput, EngineDeps, ExecuteOutcome, ExecuteRequestHandler,
    InMemoryResourceOwnership, RemediationEngine, ResourceOwnership, WorkflowConfig,
    WorkflowError, EXECUTE_JOB_TYPE, SYSTEM_ACTOR,
};
