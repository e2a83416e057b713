use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" => Some(Self::Aws),
            "azure" => Some(Self::Azure),
            "gcp" => Some(Self::Gcp),
            _ => None,
        }
    }
}

/// Destructive actions the engine knows how to dispatch.
///
/// The set is closed on purpose: free-text recommendations must be mapped
/// onto one of these variants before a request can be created, and anything
/// that does not map is rejected up front rather than guessed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    StopInstance,
    TerminateInstance,
    DeleteVolume,
    DeleteSnapshot,
    ReleaseAddress,
    StopDatabase,
    DeleteLoadBalancer,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopInstance => "stop_instance",
            Self::TerminateInstance => "terminate_instance",
            Self::DeleteVolume => "delete_volume",
            Self::DeleteSnapshot => "delete_snapshot",
            Self::ReleaseAddress => "release_address",
            Self::StopDatabase => "stop_database",
            Self::DeleteLoadBalancer => "delete_load_balancer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stop_instance" => Some(Self::StopInstance),
            "terminate_instance" => Some(Self::TerminateInstance),
            "delete_volume" => Some(Self::DeleteVolume),
            "delete_snapshot" => Some(Self::DeleteSnapshot),
            "release_address" => Some(Self::ReleaseAddress),
            "stop_database" => Some(Self::StopDatabase),
            "delete_load_balancer" => Some(Self::DeleteLoadBalancer),
            _ => None,
        }
    }

    /// Parse an action string at an ingress boundary. Unknown actions are a
    /// hard validation error, never silently ignored.
    pub fn parse_strict(value: &str) -> Result<Self, DomainError> {
        Self::parse(value).ok_or_else(|| DomainError::UnknownAction { raw: value.to_string() })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Pending,
    Approved,
    Rejected,
    Scheduled,
    Executing,
    Completed,
    Failed,
}

impl RemediationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "scheduled" => Some(Self::Scheduled),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    fn transition_allowed(from: Self, to: Self) -> bool {
        match (from, to) {
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected) => true,
            (Self::Approved, Self::Scheduled) | (Self::Approved, Self::Executing) => true,
            (Self::Scheduled, Self::Executing) => true,
            (Self::Executing, Self::Completed) | (Self::Executing, Self::Failed) => true,
            // Same-state transitions are idempotent.
            (from, to) if from == to => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemediationRequest {
    pub id: RequestId,
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub resource_type: String,
    pub provider: CloudProvider,
    pub region: String,
    pub action: RemediationAction,
    pub status: RemediationStatus,
    pub estimated_monthly_savings: Decimal,
    pub confidence_score: f64,
    pub create_backup: bool,
    pub backup_retention_days: u32,
    pub backup_cost_estimate: Option<Decimal>,
    pub backup_resource_id: Option<String>,
    pub requested_by: String,
    pub reviewed_by: Option<String>,
    pub review_notes: Option<String>,
    pub scheduled_execution_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemediationRequest {
    /// Apply a status transition, enforcing the request state machine.
    ///
    /// Returns the prior status so callers can record it in the audit trail.
    pub fn transition(
        &mut self,
        to: RemediationStatus,
        now: DateTime<Utc>,
    ) -> Result<RemediationStatus, DomainError> {
        if !RemediationStatus::transition_allowed(self.status, to) {
            return Err(DomainError::InvalidTransition { from: self.status, to });
        }

        let from = self.status;
        self.status = to;
        self.updated_at = now;
        Ok(from)
    }
}

/// Bound stored provider errors so a pathological message cannot bloat the
/// request row or downstream notifications.
pub const MAX_STORED_ERROR_LEN: usize = 500;

pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_STORED_ERROR_LEN {
        return message.to_string();
    }

    let mut end = MAX_STORED_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
