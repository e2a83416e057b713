//! Boundary traits for the cloud side of remediation.
//!
//! Provider SDK calls live behind [`CloudActionExecutor`]; the engine only
//! sees typed adapter failures with a provider code. Credentials are
//! time-limited and flow through [`CredentialProvider`], with a caching
//! decorator that refreshes them as they near expiry.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use thiserror::Error;

use reclaim_core::domain::remediation::{RemediationAction, ResourceId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{provider_code}: {message}")]
pub struct CloudActionError {
    pub provider_code: String,
    pub message: String,
    pub retryable: bool,
}

impl CloudActionError {
    pub fn new(provider_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { provider_code: provider_code.into(), message: message.into(), retryable: false }
    }
}

#[async_trait]
pub trait CloudActionExecutor: Send + Sync {
    async fn execute_action(
        &self,
        resource_id: &ResourceId,
        action: RemediationAction,
    ) -> Result<(), CloudActionError>;

    /// Create a provider-specific backup and return its id. Runs before any
    /// destructive action for requests that asked for one.
    async fn create_backup(
        &self,
        resource_id: &ResourceId,
        retention_days: u32,
    ) -> Result<String, CloudActionError>;
}

/// Default executor for deployments without provider wiring. Every call
/// fails with `PROVIDER_NOT_CONFIGURED` instead of pretending a destructive
/// action happened.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredExecutor;

#[async_trait]
impl CloudActionExecutor for UnconfiguredExecutor {
    async fn execute_action(
        &self,
        resource_id: &ResourceId,
        action: RemediationAction,
    ) -> Result<(), CloudActionError> {
        Err(CloudActionError::new(
            "PROVIDER_NOT_CONFIGURED",
            format!("no provider adapter configured for {} on `{resource_id}`", action.as_str()),
        ))
    }

    async fn create_backup(
        &self,
        resource_id: &ResourceId,
        _retention_days: u32,
    ) -> Result<String, CloudActionError> {
        Err(CloudActionError::new(
            "PROVIDER_NOT_CONFIGURED",
            format!("no provider adapter configured for backup of `{resource_id}`"),
        ))
    }
}

/// Test double that records every call and can be primed to fail.
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<(ResourceId, RemediationAction)>>,
    backups: Mutex<Vec<(ResourceId, u32)>>,
    fail_action: Mutex<Option<CloudActionError>>,
    fail_backup: Mutex<Option<CloudActionError>>,
}

impl RecordingExecutor {
    pub fn fail_actions_with(&self, error: CloudActionError) {
        *lock(&self.fail_action) = Some(error);
    }

    pub fn fail_backups_with(&self, error: CloudActionError) {
        *lock(&self.fail_backup) = Some(error);
    }

    pub fn executed_actions(&self) -> Vec<(ResourceId, RemediationAction)> {
        lock(&self.executed).clone()
    }

    pub fn backups_taken(&self) -> Vec<(ResourceId, u32)> {
        lock(&self.backups).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl CloudActionExecutor for RecordingExecutor {
    async fn execute_action(
        &self,
        resource_id: &ResourceId,
        action: RemediationAction,
    ) -> Result<(), CloudActionError> {
        if let Some(error) = lock(&self.fail_action).clone() {
            return Err(error);
        }
        lock(&self.executed).push((resource_id.clone(), action));
        Ok(())
    }

    async fn create_backup(
        &self,
        resource_id: &ResourceId,
        retention_days: u32,
    ) -> Result<String, CloudActionError> {
        if let Some(error) = lock(&self.fail_backup).clone() {
            return Err(error);
        }
        lock(&self.backups).push((resource_id.clone(), retention_days));
        Ok(format!("backup-{}", resource_id.0))
    }
}

#[derive(Clone)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl TemporaryCredentials {
    /// Refresh before actual expiry so an in-flight call never crosses it.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::minutes(5) >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential acquisition failed for connection `{connection_id}`: {message}")]
    Acquisition { connection_id: String, message: String },
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(
        &self,
        connection_id: &str,
    ) -> Result<TemporaryCredentials, CredentialError>;
}

/// Caches per-connection credentials and re-fetches them when stale.
pub struct CachingCredentialProvider<P> {
    inner: P,
    cache: tokio::sync::Mutex<HashMap<String, TemporaryCredentials>>,
}

impl<P> CachingCredentialProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner, cache: tokio::sync::Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<P> CredentialProvider for CachingCredentialProvider<P>
where
    P: CredentialProvider,
{
    async fn get_credentials(
        &self,
        connection_id: &str,
    ) -> Result<TemporaryCredentials, CredentialError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(connection_id) {
            if !cached.needs_refresh(Utc::now()) {
                return Ok(cached.clone());
            }
        }

        let fresh = self.inner.get_credentials(connection_id).await?;
        cache.insert(connection_id.to_string(), fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use super::{
        CachingCredentialProvider, CloudActionError, CloudActionExecutor, CredentialError,
        CredentialProvider, RecordingExecutor, TemporaryCredentials, UnconfiguredExecutor,
    };
    use reclaim_core::domain::remediation::{RemediationAction, ResourceId};

    struct CountingProvider {
        fetches: AtomicU32,
        ttl_secs: i64,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn get_credentials(
            &self,
            _connection_id: &str,
        ) -> Result<TemporaryCredentials, CredentialError> {
            let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TemporaryCredentials {
                access_key_id: format!("AKIA{fetch}"),
                secret_access_key: String::from("secret").into(),
                session_token: String::from("token").into(),
                expires_at: Utc::now() + Duration::seconds(self.ttl_secs),
            })
        }
    }

    #[tokio::test]
    async fn caching_provider_reuses_fresh_credentials() {
        let provider =
            CachingCredentialProvider::new(CountingProvider { fetches: AtomicU32::new(0), ttl_secs: 3600 });

        let first = provider.get_credentials("conn-1").await.unwrap();
        let second = provider.get_credentials("conn-1").await.unwrap();
        assert_eq!(first.access_key_id, second.access_key_id);
    }

    #[tokio::test]
    async fn caching_provider_refreshes_expiring_credentials() {
        // TTL under the refresh margin, so every call re-fetches.
        let provider =
            CachingCredentialProvider::new(CountingProvider { fetches: AtomicU32::new(0), ttl_secs: 60 });

        let first = provider.get_credentials("conn-1").await.unwrap();
        let second = provider.get_credentials("conn-1").await.unwrap();
        assert_ne!(first.access_key_id, second.access_key_id);
    }

    #[tokio::test]
    async fn unconfigured_executor_refuses_destructive_calls() {
        let executor = UnconfiguredExecutor;
        let error = executor
            .execute_action(&ResourceId("i-1".to_string()), RemediationAction::StopInstance)
            .await
            .unwrap_err();
        assert_eq!(error.provider_code, "PROVIDER_NOT_CONFIGURED");

        let backup_error =
            executor.create_backup(&ResourceId("vol-1".to_string()), 7).await.unwrap_err();
        assert_eq!(backup_error.provider_code, "PROVIDER_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn recording_executor_captures_calls_and_primed_failures() {
        let executor = RecordingExecutor::default();
        let resource = ResourceId("vol-9".to_string());

        let backup_id = executor.create_backup(&resource, 14).await.unwrap();
        assert_eq!(backup_id, "backup-vol-9");
        executor.execute_action(&resource, RemediationAction::DeleteVolume).await.unwrap();

        assert_eq!(executor.backups_taken(), vec![(resource.clone(), 14)]);
        assert_eq!(executor.executed_actions(), vec![(resource.clone(), RemediationAction::DeleteVolume)]);

        executor.fail_actions_with(CloudActionError::new("THROTTLED", "rate exceeded"));
        let error =
            executor.execute_action(&resource, RemediationAction::DeleteVolume).await.unwrap_err();
        assert_eq!(error.provider_code, "THROTTLED");
    }
}
