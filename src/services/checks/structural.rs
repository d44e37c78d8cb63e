//! Structural invariants over the local store alone; no provider calls.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ConsistencyIssue, Criticality, IssueSeverity, SubscriptionStatus};
use crate::services::checks::{CheckContext, ConsistencyCheck};
use crate::store::SubscriptionFilter;

pub const INVALID_STATUS: &str = "invalid_subscription_status";
pub const MULTIPLE_ACTIVE: &str = "multiple_active_paid_subscriptions";
pub const ORPHANED: &str = "orphaned_subscription";

/// Every stored status must belong to the fixed status domain.
pub struct StatusDomainCheck;

impl StatusDomainCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsistencyCheck for StatusDomainCheck {
    fn name(&self) -> &str {
        "subscription_status_domain"
    }

    fn description(&self) -> &str {
        "Every local subscription status belongs to the enumerated status domain"
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn issue_types(&self) -> Vec<String> {
        vec![INVALID_STATUS.to_string()]
    }

    #[instrument(skip(self, ctx))]
    async fn run(&self, ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;
        let issues = locals
            .iter()
            .filter(|record| record.parsed_status().is_none())
            .map(|record| ConsistencyIssue {
                issue_type: INVALID_STATUS.to_string(),
                description: format!(
                    "subscription {} has status '{}' outside the allowed domain",
                    record.id, record.status
                ),
                severity: IssueSeverity::Critical,
                affected_records: vec![record.id.to_string()],
                suggested_fix: Some("map status to a domain value manually".to_string()),
                auto_fixable: false,
            })
            .collect();
        Ok(issues)
    }
}

/// At most one active subscription may exist per owner. Violations where
/// several paid active records coexist are repaired by deactivating all but
/// the most recently created; ties on `created_at` keep the record with the
/// greater id (deterministic total order).
pub struct SingletonActiveCheck;

impl SingletonActiveCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsistencyCheck for SingletonActiveCheck {
    fn name(&self) -> &str {
        "singleton_active_subscription"
    }

    fn description(&self) -> &str {
        "Each owner holds at most one active subscription"
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn has_auto_fix(&self) -> bool {
        true
    }

    fn issue_types(&self) -> Vec<String> {
        vec![MULTIPLE_ACTIVE.to_string()]
    }

    #[instrument(skip(self, ctx))]
    async fn run(&self, ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;

        let mut active_by_owner: HashMap<Uuid, Vec<&crate::models::LocalSubscription>> =
            HashMap::new();
        for record in &locals {
            let is_active = record
                .parsed_status()
                .map(|status| status.is_active())
                .unwrap_or(false);
            if is_active {
                active_by_owner.entry(record.owner_id).or_default().push(record);
            }
        }

        let mut issues = Vec::new();
        let mut owners: Vec<_> = active_by_owner
            .iter()
            .filter(|(_, records)| records.len() > 1)
            .collect();
        owners.sort_by_key(|(owner_id, _)| **owner_id);

        for (owner_id, records) in owners {
            let mut affected: Vec<String> =
                records.iter().map(|record| record.id.to_string()).collect();
            affected.sort();
            issues.push(ConsistencyIssue {
                issue_type: MULTIPLE_ACTIVE.to_string(),
                description: format!(
                    "owner {} has {} concurrently active subscriptions",
                    owner_id,
                    records.len()
                ),
                severity: IssueSeverity::Critical,
                affected_records: affected,
                suggested_fix: Some(
                    "deactivate all but the most recently created subscription".to_string(),
                ),
                auto_fixable: true,
            });
        }

        Ok(issues)
    }

    #[instrument(skip(self, ctx, issues))]
    async fn apply_fix(
        &self,
        ctx: &CheckContext,
        issues: &[ConsistencyIssue],
    ) -> Result<(), AppError> {
        let affected: HashSet<Uuid> = issues
            .iter()
            .filter(|issue| issue.issue_type == MULTIPLE_ACTIVE)
            .flat_map(|issue| issue.affected_records.iter())
            .filter_map(|raw| raw.parse().ok())
            .collect();
        if affected.is_empty() {
            return Ok(());
        }

        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;
        let mut by_owner: HashMap<Uuid, Vec<crate::models::LocalSubscription>> = HashMap::new();
        for record in locals {
            if affected.contains(&record.id) {
                by_owner.entry(record.owner_id).or_default().push(record);
            }
        }

        for (owner_id, mut records) in by_owner {
            // Most recently created wins; equal timestamps fall back to the
            // greater id so the survivor is deterministic.
            records.sort_by(|a, b| {
                (b.created_at, b.id).cmp(&(a.created_at, a.id))
            });
            let survivor = records[0].id;
            for mut record in records.into_iter().skip(1) {
                record.status = SubscriptionStatus::Canceled.as_str().to_string();
                record.updated_at = Utc::now();
                info!(
                    owner_id = %owner_id,
                    subscription_id = %record.id,
                    survivor = %survivor,
                    "Deactivating superseded duplicate active subscription"
                );
                ctx.store.upsert_subscription(record).await?;
            }
        }

        Ok(())
    }
}

/// Subscriptions whose owning account no longer exists are archived, never
/// deleted.
pub struct OrphanedSubscriptionsCheck;

impl OrphanedSubscriptionsCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsistencyCheck for OrphanedSubscriptionsCheck {
    fn name(&self) -> &str {
        "orphaned_subscriptions"
    }

    fn description(&self) -> &str {
        "Every subscription belongs to an existing owner"
    }

    fn criticality(&self) -> Criticality {
        Criticality::Medium
    }

    fn has_auto_fix(&self) -> bool {
        true
    }

    fn issue_types(&self) -> Vec<String> {
        vec![ORPHANED.to_string()]
    }

    #[instrument(skip(self, ctx))]
    async fn run(&self, ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;
        let mut issues = Vec::new();

        for record in &locals {
            if record.parsed_status() == Some(SubscriptionStatus::Archived) {
                continue;
            }
            if !ctx.store.owner_exists(record.owner_id).await? {
                issues.push(ConsistencyIssue {
                    issue_type: ORPHANED.to_string(),
                    description: format!(
                        "subscription {} belongs to missing owner {}",
                        record.id, record.owner_id
                    ),
                    severity: IssueSeverity::Error,
                    affected_records: vec![record.id.to_string()],
                    suggested_fix: Some("archive the orphaned subscription".to_string()),
                    auto_fixable: true,
                });
            }
        }

        Ok(issues)
    }

    #[instrument(skip(self, ctx, issues))]
    async fn apply_fix(
        &self,
        ctx: &CheckContext,
        issues: &[ConsistencyIssue],
    ) -> Result<(), AppError> {
        let affected: HashSet<Uuid> = issues
            .iter()
            .filter(|issue| issue.issue_type == ORPHANED)
            .flat_map(|issue| issue.affected_records.iter())
            .filter_map(|raw| raw.parse().ok())
            .collect();

        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;
        for mut record in locals {
            if !affected.contains(&record.id) {
                continue;
            }
            record.status = SubscriptionStatus::Archived.as_str().to_string();
            record.updated_at = Utc::now();
            info!(subscription_id = %record.id, "Archiving orphaned subscription");
            ctx.store.upsert_subscription(record).await?;
        }

        Ok(())
    }
}
