//! In-memory adapters for [`LocalStore`] and [`RemoteProvider`].
//!
//! Reference implementations used by the test suites and by local tooling
//! that wants the engine without a real database or provider account.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{LocalSubscription, RemoteSubscription};
use crate::store::{LocalStore, ProviderError, RemoteProvider, SubscriptionFilter};

/// In-memory local store. Snapshots are full copies of the record map held
/// until the store is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<Uuid, LocalSubscription>>,
    owners: RwLock<HashMap<Uuid, bool>>,
    snapshots: RwLock<HashMap<String, HashMap<Uuid, LocalSubscription>>>,
    external_access_enabled: AtomicBool,
    mutation_count: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            external_access_enabled: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub async fn insert_owner(&self, owner_id: Uuid) {
        self.owners.write().await.insert(owner_id, true);
    }

    pub async fn insert_subscription(&self, record: LocalSubscription) {
        self.records.write().await.insert(record.id, record);
    }

    /// Number of mutating calls made through the `LocalStore` interface.
    pub fn mutation_count(&self) -> usize {
        self.mutation_count.load(Ordering::SeqCst)
    }

    pub fn external_access_enabled(&self) -> bool {
        self.external_access_enabled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<LocalSubscription>, AppError> {
        let records = self.records.read().await;
        let mut matched: Vec<LocalSubscription> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        // Deterministic order for reproducible reports.
        matched.sort_by_key(|record| (record.created_at, record.id));
        Ok(matched)
    }

    async fn upsert_subscription(
        &self,
        record: LocalSubscription,
    ) -> Result<LocalSubscription, AppError> {
        self.mutation_count.fetch_add(1, Ordering::SeqCst);
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_subscription(&self, id: Uuid) -> Result<(), AppError> {
        self.mutation_count.fetch_add(1, Ordering::SeqCst);
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, AppError> {
        Ok(self.owners.read().await.get(&owner_id).copied().unwrap_or(false))
    }

    async fn create_snapshot(&self) -> Result<String, AppError> {
        let handle = format!("snapshot-{}", Uuid::new_v4());
        let records = self.records.read().await.clone();
        self.snapshots.write().await.insert(handle.clone(), records);
        debug!(handle = %handle, "Captured in-memory snapshot");
        Ok(handle)
    }

    async fn restore_snapshot(&self, handle: &str) -> Result<(), AppError> {
        let snapshots = self.snapshots.read().await;
        let snapshot = snapshots
            .get(handle)
            .ok_or_else(|| AppError::StoreError(format!("unknown snapshot handle: {handle}")))?
            .clone();
        drop(snapshots);
        // Only a restore that actually found its snapshot counts as a
        // mutation.
        self.mutation_count.fetch_add(1, Ordering::SeqCst);
        *self.records.write().await = snapshot;
        debug!(handle = %handle, "Restored in-memory snapshot");
        Ok(())
    }

    async fn set_external_access(&self, enabled: bool) -> Result<(), AppError> {
        self.external_access_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory remote provider with injectable failures, for tests and local
/// tooling.
#[derive(Default)]
pub struct InMemoryProvider {
    records: RwLock<HashMap<String, RemoteSubscription>>,
    /// Remote ids that fail with `RateLimited` for the first N fetches.
    rate_limit_budget: RwLock<HashMap<String, u32>>,
    fetch_count: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_subscription(&self, record: RemoteSubscription) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Make the next `failures` fetches of `remote_id` fail with a rate
    /// limit before succeeding.
    pub async fn rate_limit_next(&self, remote_id: &str, failures: u32) {
        self.rate_limit_budget
            .write()
            .await
            .insert(remote_id.to_string(), failures);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteProvider for InMemoryProvider {
    async fn fetch_subscription(
        &self,
        remote_id: &str,
    ) -> Result<RemoteSubscription, ProviderError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let mut budgets = self.rate_limit_budget.write().await;
        if let Some(remaining) = budgets.get_mut(remote_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::RateLimited(format!(
                    "simulated rate limit for {remote_id}"
                )));
            }
        }
        drop(budgets);

        self.records
            .read()
            .await
            .get(remote_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(remote_id.to_string()))
    }
}
