//! Consistency check registry.
//!
//! Each check compares a slice of local store state against the billing
//! provider's authoritative view (or validates a purely local structural
//! invariant) and produces structured issues. Checks are registered once at
//! startup into an ordered list; registration order is report order.

pub mod remote_parity;
pub mod structural;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ReconcilerConfig;
use crate::errors::AppError;
use crate::models::{CheckDescriptor, ConsistencyIssue, Criticality};
use crate::store::{LocalStore, ProviderError, RemoteProvider};

pub use remote_parity::{RemoteLinkageCheck, RemoteParityCheck};
pub use structural::{OrphanedSubscriptionsCheck, SingletonActiveCheck, StatusDomainCheck};

/// Shared context handed to every check invocation.
///
/// Holds the two record-source seams plus the semaphore bounding concurrent
/// outbound provider calls, so no single validation pass can overwhelm the
/// provider's rate limits.
pub struct CheckContext {
    pub store: Arc<dyn LocalStore>,
    pub provider: Arc<dyn RemoteProvider>,
    pub config: ReconcilerConfig,
    remote_permits: Semaphore,
}

impl CheckContext {
    pub fn new(
        store: Arc<dyn LocalStore>,
        provider: Arc<dyn RemoteProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        let permits = config.max_concurrent_remote_calls.max(1);
        Self {
            store,
            provider,
            config,
            remote_permits: Semaphore::new(permits),
        }
    }

    /// Fetch a remote subscription, retrying rate-limit and transient
    /// failures with exponential backoff. `NotFound` is final and surfaces
    /// immediately.
    pub async fn fetch_remote(
        &self,
        remote_id: &str,
    ) -> Result<crate::models::RemoteSubscription, ProviderError> {
        let _permit = self
            .remote_permits
            .acquire()
            .await
            .map_err(|_| ProviderError::Transient("remote permit pool closed".to_string()))?;

        let mut delay_ms = self.config.base_retry_delay_ms;
        let mut attempt = 0u32;
        loop {
            match self.provider.fetch_subscription(remote_id).await {
                Ok(record) => return Ok(record),
                Err(err) if err.is_retryable() && attempt < self.config.remote_retry_limit => {
                    attempt += 1;
                    warn!(
                        remote_id = %remote_id,
                        attempt = attempt,
                        delay_ms = delay_ms,
                        error = %err,
                        "Retryable provider failure, backing off"
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(self.config.max_retry_delay_ms);
                }
                Err(err) => {
                    debug!(remote_id = %remote_id, error = %err, "Provider fetch failed");
                    return Err(err);
                }
            }
        }
    }
}

/// A named, independently runnable consistency check.
#[async_trait]
pub trait ConsistencyCheck: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn criticality(&self) -> Criticality;

    /// Whether this check ships a corrective action for its resolvable
    /// issues. A check that returns `false` here must never emit
    /// `auto_fixable: true` issues; the validator enforces this.
    fn has_auto_fix(&self) -> bool {
        false
    }

    /// Issue types this check can emit. Used by the report builder to
    /// attribute issues back to their owning check.
    fn issue_types(&self) -> Vec<String>;

    /// Compare local and remote state and report divergences. Returning
    /// `Err` marks a check execution fault, which the validator converts to
    /// a synthetic critical issue instead of aborting the batch.
    async fn run(&self, ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError>;

    /// Apply the corrective action for this check's auto-fixable issues.
    /// Only invoked when `has_auto_fix()` is true.
    async fn apply_fix(
        &self,
        _ctx: &CheckContext,
        _issues: &[ConsistencyIssue],
    ) -> Result<(), AppError> {
        Ok(())
    }

    fn descriptor(&self) -> CheckDescriptor {
        CheckDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            criticality: self.criticality(),
            has_auto_fix: self.has_auto_fix(),
            issue_types: self.issue_types(),
        }
    }
}

/// The default registry: remote parity first, then structural invariants.
pub fn default_checks() -> Vec<Arc<dyn ConsistencyCheck>> {
    vec![
        Arc::new(RemoteParityCheck::new()),
        Arc::new(RemoteLinkageCheck::new()),
        Arc::new(StatusDomainCheck::new()),
        Arc::new(SingletonActiveCheck::new()),
        Arc::new(OrphanedSubscriptionsCheck::new()),
    ]
}
