//! Checks comparing local records against the billing provider.
//!
//! The provider is authoritative for the fields it owns (status, amount,
//! billing period): field-level divergence is auto-fixable by overwriting the
//! local value. A local record whose remote counterpart no longer exists is
//! critical and left for human adjudication, never auto-deleted.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    ConsistencyIssue, Criticality, IssueSeverity, LocalSubscription, RemoteSubscription,
};
use crate::services::checks::{CheckContext, ConsistencyCheck};
use crate::store::{ProviderError, SubscriptionFilter};

pub const STATUS_MISMATCH: &str = "subscription_status_mismatch";
pub const PERIOD_MISMATCH: &str = "billing_period_mismatch";
pub const AMOUNT_MISMATCH: &str = "subscription_amount_mismatch";
pub const REMOTE_FETCH_FAILED: &str = "remote_fetch_failed";
pub const MISSING_REMOTE: &str = "missing_remote_subscription";
pub const ACTIVE_UNLINKED: &str = "active_subscription_unlinked";

/// Field-level parity between local records and their provider counterparts:
/// status, billing period (UTC-normalized), and amount/currency.
pub struct RemoteParityCheck;

impl RemoteParityCheck {
    pub fn new() -> Self {
        Self
    }

    fn diff_record(
        local: &LocalSubscription,
        remote: &RemoteSubscription,
    ) -> Vec<ConsistencyIssue> {
        let mut issues = Vec::new();
        let record_id = local.id.to_string();

        let remote_status = remote
            .local_status()
            .map(|status| status.as_str().to_string())
            .unwrap_or_else(|| remote.status.clone());
        if local.status != remote_status {
            issues.push(ConsistencyIssue {
                issue_type: STATUS_MISMATCH.to_string(),
                description: format!(
                    "subscription {}: local status '{}' does not match remote status '{}'",
                    local.id, local.status, remote_status
                ),
                severity: IssueSeverity::Error,
                affected_records: vec![record_id.clone()],
                suggested_fix: Some(format!(
                    "overwrite local status with authoritative remote value '{remote_status}'"
                )),
                auto_fixable: true,
            });
        }

        // Periods are compared after normalization to UTC; DateTime<Utc>
        // comparison is timezone-safe by construction.
        if local.current_period_start != remote.current_period_start
            || local.current_period_end != remote.current_period_end
        {
            issues.push(ConsistencyIssue {
                issue_type: PERIOD_MISMATCH.to_string(),
                description: format!(
                    "subscription {}: local period {}..{} does not match remote period {}..{}",
                    local.id,
                    local.current_period_start.to_rfc3339(),
                    local.current_period_end.to_rfc3339(),
                    remote.current_period_start.to_rfc3339(),
                    remote.current_period_end.to_rfc3339(),
                ),
                severity: IssueSeverity::Error,
                affected_records: vec![record_id.clone()],
                suggested_fix: Some(
                    "overwrite local billing period with authoritative remote period".to_string(),
                ),
                auto_fixable: true,
            });
        }

        if local.amount_cents != remote.amount_cents || local.currency != remote.currency {
            issues.push(ConsistencyIssue {
                issue_type: AMOUNT_MISMATCH.to_string(),
                description: format!(
                    "subscription {}: local amount {} {} does not match remote amount {} {}",
                    local.id, local.amount_cents, local.currency, remote.amount_cents, remote.currency
                ),
                severity: IssueSeverity::Error,
                affected_records: vec![record_id],
                suggested_fix: Some(
                    "overwrite local amount and currency with authoritative remote values"
                        .to_string(),
                ),
                auto_fixable: true,
            });
        }

        issues
    }
}

#[async_trait]
impl ConsistencyCheck for RemoteParityCheck {
    fn name(&self) -> &str {
        "remote_field_parity"
    }

    fn description(&self) -> &str {
        "Local subscription status, billing period and amount match the billing provider"
    }

    fn criticality(&self) -> Criticality {
        Criticality::High
    }

    fn has_auto_fix(&self) -> bool {
        true
    }

    fn issue_types(&self) -> Vec<String> {
        vec![
            STATUS_MISMATCH.to_string(),
            PERIOD_MISMATCH.to_string(),
            AMOUNT_MISMATCH.to_string(),
            REMOTE_FETCH_FAILED.to_string(),
        ]
    }

    #[instrument(skip(self, ctx))]
    async fn run(&self, ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;
        let mut issues = Vec::new();

        for local in locals.iter().filter(|record| record.remote_id.is_some()) {
            let remote_id = local.remote_id.as_deref().unwrap_or_default();
            match ctx.fetch_remote(remote_id).await {
                Ok(remote) => issues.extend(Self::diff_record(local, &remote)),
                // Existence is the linkage check's concern; field parity for
                // a missing record is meaningless.
                Err(ProviderError::NotFound(_)) => continue,
                Err(err) => {
                    warn!(
                        subscription_id = %local.id,
                        remote_id = %remote_id,
                        error = %err,
                        "Remote fetch failed during parity check"
                    );
                    issues.push(ConsistencyIssue {
                        issue_type: REMOTE_FETCH_FAILED.to_string(),
                        description: format!(
                            "subscription {}: remote record {} could not be fetched",
                            local.id, remote_id
                        ),
                        severity: IssueSeverity::Warning,
                        affected_records: vec![local.id.to_string()],
                        suggested_fix: None,
                        auto_fixable: false,
                    });
                }
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
            .filter(|issue| issue.auto_fixable)
            .flat_map(|issue| issue.affected_records.iter())
            .filter_map(|raw| raw.parse().ok())
            .collect();

        for record_id in affected {
            let filter = SubscriptionFilter::default();
            let locals = ctx.store.subscriptions(&filter).await?;
            let Some(local) = locals.into_iter().find(|record| record.id == record_id) else {
                continue;
            };
            let Some(remote_id) = local.remote_id.clone() else {
                continue;
            };

            let remote = match ctx.fetch_remote(&remote_id).await {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(
                        subscription_id = %local.id,
                        error = %err,
                        "Skipping parity fix, remote record unavailable"
                    );
                    continue;
                }
            };

            let mut fixed = local;
            if let Some(status) = remote.local_status() {
                fixed.status = status.as_str().to_string();
            }
            fixed.current_period_start = remote.current_period_start;
            fixed.current_period_end = remote.current_period_end;
            fixed.amount_cents = remote.amount_cents;
            fixed.currency = remote.currency.clone();
            fixed.updated_at = Utc::now();

            info!(
                subscription_id = %fixed.id,
                remote_id = %remote_id,
                "Reconciled local subscription fields from remote"
            );
            ctx.store.upsert_subscription(fixed).await?;
        }

        Ok(())
    }
}

/// Referential existence between the two systems: every local record that
/// references a remote identifier must resolve at the provider, and every
/// known-active local record must carry a remote linkage.
pub struct RemoteLinkageCheck;

impl RemoteLinkageCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsistencyCheck for RemoteLinkageCheck {
    fn name(&self) -> &str {
        "remote_linkage"
    }

    fn description(&self) -> &str {
        "Every locally referenced remote subscription exists at the provider, and active local records are linked"
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn issue_types(&self) -> Vec<String> {
        vec![
            MISSING_REMOTE.to_string(),
            ACTIVE_UNLINKED.to_string(),
            REMOTE_FETCH_FAILED.to_string(),
        ]
    }

    #[instrument(skip(self, ctx))]
    async fn run(&self, ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        let locals = ctx.store.subscriptions(&SubscriptionFilter::default()).await?;
        let mut issues = Vec::new();

        for local in &locals {
            match &local.remote_id {
                Some(remote_id) => match ctx.fetch_remote(remote_id).await {
                    Ok(_) => {}
                    Err(ProviderError::NotFound(_)) => {
                        issues.push(ConsistencyIssue {
                            issue_type: MISSING_REMOTE.to_string(),
                            description: format!(
                                "subscription {} references remote record {} which no longer exists",
                                local.id, remote_id
                            ),
                            severity: IssueSeverity::Critical,
                            affected_records: vec![local.id.to_string()],
                            // Requires human judgement; never auto-deleted.
                            suggested_fix: Some(
                                "manually reconcile against provider records".to_string(),
                            ),
                            auto_fixable: false,
                        });
                    }
                    Err(err) => {
                        warn!(
                            subscription_id = %local.id,
                            remote_id = %remote_id,
                            error = %err,
                            "Remote fetch failed during linkage check"
                        );
                        issues.push(ConsistencyIssue {
                            issue_type: REMOTE_FETCH_FAILED.to_string(),
                            description: format!(
                                "subscription {}: remote record {} could not be fetched",
                                local.id, remote_id
                            ),
                            severity: IssueSeverity::Warning,
                            affected_records: vec![local.id.to_string()],
                            suggested_fix: None,
                            auto_fixable: false,
                        });
                    }
                },
                None => {
                    let is_active = local
                        .parsed_status()
                        .map(|status| status.is_active())
                        .unwrap_or(false);
                    if is_active && local.amount_cents > 0 {
                        issues.push(ConsistencyIssue {
                            issue_type: ACTIVE_UNLINKED.to_string(),
                            description: format!(
                                "subscription {} is active and billable but has no remote linkage",
                                local.id
                            ),
                            severity: IssueSeverity::Error,
                            affected_records: vec![local.id.to_string()],
                            suggested_fix: Some(
                                "link to provider record or cancel locally".to_string(),
                            ),
                            auto_fixable: false,
                        });
                    }
                }
            }
        }

        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::store::LocalStore;
    use crate::test_helpers::{test_context, test_local_subscription, test_remote_subscription};

    #[tokio::test]
    async fn status_mismatch_is_detected_and_fixed() {
        let (ctx, store, provider) = test_context(ReconcilerConfig::default());
        let mut local = test_local_subscription("active", Some("sub_1"));
        let remote = test_remote_subscription("sub_1", "canceled", local.amount_cents);
        local.current_period_start = remote.current_period_start;
        local.current_period_end = remote.current_period_end;
        store.insert_owner(local.owner_id).await;
        store.insert_subscription(local.clone()).await;
        provider.insert_subscription(remote).await;

        let check = RemoteParityCheck::new();
        let issues = check.run(&ctx).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, STATUS_MISMATCH);
        assert_eq!(issues[0].severity, IssueSeverity::Error);
        assert!(issues[0].auto_fixable);

        check.apply_fix(&ctx, &issues).await.unwrap();
        let recheck = check.run(&ctx).await.unwrap();
        assert!(recheck.is_empty());

        let fixed = store
            .subscriptions(&SubscriptionFilter::default())
            .await
            .unwrap();
        assert_eq!(fixed[0].status, "canceled");
    }

    #[tokio::test]
    async fn missing_remote_record_is_critical_and_not_fixable() {
        let (ctx, store, _provider) = test_context(ReconcilerConfig::default());
        let local = test_local_subscription("active", Some("sub_gone"));
        store.insert_owner(local.owner_id).await;
        store.insert_subscription(local).await;

        let check = RemoteLinkageCheck::new();
        let issues = check.run(&ctx).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, MISSING_REMOTE);
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
        assert!(!issues[0].auto_fixable);
    }

    #[tokio::test]
    async fn active_billable_record_without_linkage_is_reported() {
        let (ctx, store, _provider) = test_context(ReconcilerConfig::default());
        let local = test_local_subscription("active", None);
        store.insert_owner(local.owner_id).await;
        store.insert_subscription(local).await;

        let check = RemoteLinkageCheck::new();
        let issues = check.run(&ctx).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, ACTIVE_UNLINKED);
        assert!(!issues[0].auto_fixable);
    }

    #[tokio::test]
    async fn amount_and_period_mismatches_are_separate_issues() {
        let (ctx, store, provider) = test_context(ReconcilerConfig::default());
        let local = test_local_subscription("active", Some("sub_1"));
        let mut remote = test_remote_subscription("sub_1", "active", local.amount_cents + 500);
        remote.current_period_end = local.current_period_end + chrono::Duration::days(30);
        remote.current_period_start = local.current_period_start;
        store.insert_owner(local.owner_id).await;
        store.insert_subscription(local).await;
        provider.insert_subscription(remote).await;

        let check = RemoteParityCheck::new();
        let issues = check.run(&ctx).await.unwrap();
        let types: Vec<&str> = issues.iter().map(|issue| issue.issue_type.as_str()).collect();
        assert!(types.contains(&PERIOD_MISMATCH));
        assert!(types.contains(&AMOUNT_MISMATCH));
        assert!(!types.contains(&STATUS_MISMATCH));
    }
}
