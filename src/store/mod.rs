//! Persistence and provider seams.
//!
//! The engine never talks to a concrete database or billing API: it reads and
//! mutates local state through [`LocalStore`] and reads provider ground truth
//! through [`RemoteProvider`]. All mutations made during auto-fix or rollback
//! funnel through the same `LocalStore` so a single implementation point can
//! enforce transactional boundaries.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{LocalSubscription, RemoteSubscription};

pub use memory::{InMemoryProvider, InMemoryStore};

/// Filter for querying local subscription records.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub owner_id: Option<Uuid>,
    pub status: Option<String>,
    pub remote_id: Option<String>,
}

impl SubscriptionFilter {
    pub fn matches(&self, record: &LocalSubscription) -> bool {
        if let Some(owner_id) = self.owner_id {
            if record.owner_id != owner_id {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if &record.status != status {
                return false;
            }
        }
        if let Some(remote_id) = &self.remote_id {
            if record.remote_id.as_deref() != Some(remote_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The local system-of-record. The only mutable shared resource in the
/// engine; implementations are expected to wrap each call in a transaction
/// where the underlying store supports it.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<LocalSubscription>, AppError>;

    async fn upsert_subscription(
        &self,
        record: LocalSubscription,
    ) -> Result<LocalSubscription, AppError>;

    async fn delete_subscription(&self, id: Uuid) -> Result<(), AppError>;

    /// Whether the owning user/account still exists. Used by the orphan check.
    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, AppError>;

    /// Capture a recoverability point before a rollback mutates anything.
    /// Returns an opaque backup handle.
    async fn create_snapshot(&self) -> Result<String, AppError>;

    /// Restore the store to a previously captured snapshot.
    async fn restore_snapshot(&self, handle: &str) -> Result<(), AppError>;

    /// Toggle external access (maintenance mode). Used by the emergency
    /// rollback plan to stop new writes before restoring state.
    async fn set_external_access(&self, enabled: bool) -> Result<(), AppError>;
}

/// Failure modes of the remote provider. `NotFound` must stay distinguishable
/// from transient network trouble: a missing remote record needs human
/// adjudication, a timeout needs a retry.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("remote record not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Transient(_))
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(id) => AppError::RemoteNotFound(id),
            ProviderError::RateLimited(message) => AppError::RemoteRateLimited(message),
            ProviderError::Transient(message) => AppError::RemoteProviderError(message),
        }
    }
}

/// The external authoritative billing system. Read-only ground truth for the
/// fields it owns.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    async fn fetch_subscription(&self, remote_id: &str)
        -> Result<RemoteSubscription, ProviderError>;
}
