use thiserror::Error;

use crate::domain::remediation::RemediationStatus;
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("invalid remediation transition from {from:?} to {to:?}")]
    InvalidTransition { from: RemediationStatus, to: RemediationStatus },
    #[error("unknown remediation action `{raw}`")]
    UnknownAction { raw: String },
    #[error("resource `{resource_id}` is not owned by tenant `{tenant_id}`")]
    CrossTenantResource { tenant_id: TenantId, resource_id: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::DomainError;
    use crate::domain::remediation::RemediationStatus;

    #[test]
    fn errors_render_operator_readable_messages() {
        let transition = DomainError::InvalidTransition {
            from: RemediationStatus::Completed,
            to: RemediationStatus::Executing,
        };
        assert!(transition.to_string().contains("Completed"));

        let unknown = DomainError::UnknownAction { raw: "defrag".to_string() };
        assert_eq!(unknown.to_string(), "unknown remediation action `defrag`");
    }
}
