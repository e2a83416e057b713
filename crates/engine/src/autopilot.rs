//! Savings autopilot: executes high-confidence recommendations without
//! per-item human approval.
//!
//! This is the only path that bypasses the cooling-off period, which is why
//! every item still goes through the full guardrail gauntlet inside
//! `execute` and why anything ambiguous is skipped rather than guessed at.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use reclaim_core::domain::recommendation::{parse_savings, ActionMapper, Recommendation};
use reclaim_core::domain::remediation::{CloudProvider, ResourceId};
use reclaim_core::domain::tenant::TenantId;

use crate::guardrails::GuardrailError;
use crate::workflow::{
    CreateRequestInput, ExecuteOutcome, RemediationEngine, WorkflowError, SYSTEM_ACTOR,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis source failure: {0}")]
    Unavailable(String),
}

/// Latest AI analysis per tenant; the analyzer itself is an external
/// collaborator.
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    async fn latest_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<Recommendation>, AnalysisError>;
}

#[derive(Default)]
pub struct InMemoryAnalysisSource {
    recommendations: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Recommendation>>>,
}

impl InMemoryAnalysisSource {
    pub async fn set(&self, tenant_id: &TenantId, recommendations: Vec<Recommendation>) {
        self.recommendations.write().await.insert(tenant_id.0.clone(), recommendations);
    }
}

#[async_trait]
impl AnalysisSource for InMemoryAnalysisSource {
    async fn latest_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<Recommendation>, AnalysisError> {
        Ok(self.recommendations.read().await.get(&tenant_id.0).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AutopilotConfig {
    pub min_confidence: f64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self { min_confidence: 0.85 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutopilotSummary {
    pub considered: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped_low_confidence: u32,
    pub skipped_unmapped: u32,
    pub skipped_unparsable: u32,
    pub errors: u32,
    /// A guardrail veto halts the rest of the tenant's batch; the veto
    /// message lands here.
    pub halted: Option<String>,
}

pub struct SavingsAutopilot {
    engine: Arc<RemediationEngine>,
    analysis: Arc<dyn AnalysisSource>,
    mapper: ActionMapper,
    config: AutopilotConfig,
}

impl SavingsAutopilot {
    pub fn new(
        engine: Arc<RemediationEngine>,
        analysis: Arc<dyn AnalysisSource>,
        config: AutopilotConfig,
    ) -> Self {
        Self { engine, analysis, mapper: ActionMapper::default(), config }
    }

    pub async fn run_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<AutopilotSummary, AnalysisError> {
        let recommendations = self.analysis.latest_for_tenant(tenant_id).await?;
        let mut summary = AutopilotSummary::default();

        for recommendation in recommendations {
            if !recommendation.autonomous_ready {
                continue;
            }
            summary.considered += 1;

            if recommendation.confidence < self.config.min_confidence {
                summary.skipped_low_confidence += 1;
                continue;
            }

            let Some(action) = self.mapper.map(&recommendation.action) else {
                summary.skipped_unmapped += 1;
                warn!(
                    event_name = "autopilot.action_unmapped",
                    tenant_id = %tenant_id,
                    resource_id = %recommendation.resource_id,
                    action_text = %recommendation.action,
                    "no action mapping; skipping rather than guessing"
                );
                continue;
            };

            let Some(provider) = CloudProvider::parse(&recommendation.provider) else {
                summary.skipped_unmapped += 1;
                warn!(
                    event_name = "autopilot.provider_unknown",
                    tenant_id = %tenant_id,
                    resource_id = %recommendation.resource_id,
                    provider = %recommendation.provider,
                    "unknown provider; skipping"
                );
                continue;
            };

            let Some(savings) = parse_savings(&recommendation.estimated_savings) else {
                summary.skipped_unparsable += 1;
                warn!(
                    event_name = "autopilot.savings_unparsable",
                    tenant_id = %tenant_id,
                    resource_id = %recommendation.resource_id,
                    estimated_savings = %recommendation.estimated_savings,
                    "could not parse savings estimate; skipping"
                );
                continue;
            };

            let input = CreateRequestInput {
                tenant_id: tenant_id.clone(),
                resource_id: ResourceId(recommendation.resource_id.clone()),
                resource_type: recommendation.resource_type.clone(),
                provider,
                region: recommendation.region.clone(),
                action: action.as_str().to_string(),
                estimated_monthly_savings: savings,
                confidence_score: recommendation.confidence,
                create_backup: backup_worthwhile(action),
                backup_retention_days: 7,
                requested_by: SYSTEM_ACTOR.to_string(),
            };

            match self.launch(input).await {
                Ok(ExecuteOutcome::Completed(request)) => {
                    summary.completed += 1;
                    info!(
                        event_name = "autopilot.remediated",
                        tenant_id = %tenant_id,
                        request_id = %request.id,
                        action = request.action.as_str(),
                        savings = %request.estimated_monthly_savings,
                        "autonomous remediation completed"
                    );
                }
                Ok(ExecuteOutcome::Failed(request)) => {
                    summary.failed += 1;
                    warn!(
                        event_name = "autopilot.remediation_failed",
                        tenant_id = %tenant_id,
                        request_id = %request.id,
                        error = request.execution_error.as_deref().unwrap_or("unknown"),
                        "autonomous remediation failed"
                    );
                }
                Ok(other) => {
                    // Bypassed executions either complete or fail; anything
                    // else is bookkeeping noise worth surfacing.
                    summary.errors += 1;
                    warn!(
                        event_name = "autopilot.unexpected_outcome",
                        tenant_id = %tenant_id,
                        outcome = other.as_str(),
                        "unexpected execute outcome for bypassed request"
                    );
                }
                Err(WorkflowError::Guardrail(GuardrailError::Veto(veto))) => {
                    summary.halted = Some(veto.to_string());
                    warn!(
                        event_name = "autopilot.halted",
                        tenant_id = %tenant_id,
                        veto = %veto,
                        "guardrail veto; halting the tenant batch"
                    );
                    break;
                }
                Err(error) => {
                    summary.errors += 1;
                    warn!(
                        event_name = "autopilot.item_failed",
                        tenant_id = %tenant_id,
                        resource_id = %recommendation.resource_id,
                        error = %error,
                        "autopilot item failed"
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn launch(&self, input: CreateRequestInput) -> Result<ExecuteOutcome, WorkflowError> {
        let request = self.engine.create_request(input).await?;
        self.engine
            .approve(&request.id, SYSTEM_ACTOR, Some("autopilot high-confidence approval".into()))
            .await?;
        self.engine.execute(&request.id, true).await
    }
}

/// Stop-style actions are reversible; destructive deletes get a backup
/// first. Snapshots are already backups, so deleting one takes none.
fn backup_worthwhile(action: reclaim_core::domain::remediation::RemediationAction) -> bool {
    use reclaim_core::domain::remediation::RemediationAction::*;
    matches!(action, TerminateInstance | DeleteVolume | DeleteLoadBalancer)
}
