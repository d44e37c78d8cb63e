//! Consistency validator: runs every registered check, recovers per-check
//! faults into structured issues, drives auto-fix, and keeps the validation
//! history for trend inspection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::errors::AppError;
use crate::models::{CheckDescriptor, ConsistencyIssue, ConsistencyResult, IssueSeverity};
use crate::services::auto_fix::AutoFixEngine;
use crate::services::checks::{self, CheckContext, ConsistencyCheck};
use crate::store::{LocalStore, RemoteProvider};

/// Issue type for a check that fails to execute at all.
pub const VALIDATION_ERROR: &str = "validation_error";

/// Orchestrator owning the ordered check registry and the run history.
///
/// History is explicit per-instance state, not a process-wide singleton;
/// dropping the validator drops the history.
pub struct ConsistencyValidator {
    ctx: CheckContext,
    checks: Vec<Arc<dyn ConsistencyCheck>>,
    auto_fix: AutoFixEngine,
    history: RwLock<Vec<ConsistencyResult>>,
}

impl ConsistencyValidator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        provider: Arc<dyn RemoteProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        Self::with_checks(store, provider, config, checks::default_checks())
    }

    /// Build with an explicit check registry. Registration order is the
    /// deterministic execution and report order.
    pub fn with_checks(
        store: Arc<dyn LocalStore>,
        provider: Arc<dyn RemoteProvider>,
        config: ReconcilerConfig,
        checks: Vec<Arc<dyn ConsistencyCheck>>,
    ) -> Self {
        Self {
            ctx: CheckContext::new(store, provider, config),
            checks,
            auto_fix: AutoFixEngine::new(),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn check_descriptors(&self) -> Vec<CheckDescriptor> {
        self.checks.iter().map(|check| check.descriptor()).collect()
    }

    pub fn context(&self) -> &CheckContext {
        &self.ctx
    }

    /// Run every registered check in registration order.
    ///
    /// One check's failure never prevents the remaining checks from running:
    /// execution faults become synthetic critical issues. Auto-fix runs
    /// inline (synchronously) for checks that declare it, before the next
    /// check starts.
    #[instrument(skip(self, cancel))]
    pub async fn run_full_validation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConsistencyResult, AppError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_start = std::time::Instant::now();

        info!(run_id = %run_id, checks = self.checks.len(), "Starting full consistency validation");

        let mut all_issues: Vec<ConsistencyIssue> = Vec::new();
        let mut metrics: HashMap<String, f64> = HashMap::new();
        let mut fix_attempts = 0u32;
        let mut fix_successes = 0u32;

        for check in &self.checks {
            if cancel.is_cancelled() {
                warn!(run_id = %run_id, check = check.name(), "Validation cancelled between checks");
                return Err(AppError::Cancelled(format!(
                    "validation run {run_id} cancelled before check '{}'",
                    check.name()
                )));
            }

            let check_start = std::time::Instant::now();
            let mut check_issues = match check.run(&self.ctx).await {
                Ok(issues) => issues,
                Err(err) => {
                    error!(
                        run_id = %run_id,
                        check = check.name(),
                        error = %err,
                        "Check execution fault; recording synthetic issue"
                    );
                    vec![ConsistencyIssue {
                        issue_type: VALIDATION_ERROR.to_string(),
                        description: format!(
                            "check '{}' failed to execute: {}",
                            check.name(),
                            err
                        ),
                        severity: IssueSeverity::Critical,
                        affected_records: Vec::new(),
                        suggested_fix: None,
                        auto_fixable: false,
                    }]
                }
            };

            // A check that declares no auto-fix must not emit fixable issues.
            if !check.has_auto_fix() {
                for issue in check_issues.iter_mut().filter(|issue| issue.auto_fixable) {
                    warn!(
                        check = check.name(),
                        issue_type = %issue.issue_type,
                        "Check without auto-fix emitted a fixable issue; clearing flag"
                    );
                    issue.auto_fixable = false;
                }
            }

            let has_fixable = check_issues.iter().any(|issue| issue.auto_fixable);
            if self.ctx.config.enable_auto_fix && check.has_auto_fix() && has_fixable {
                fix_attempts += 1;
                if self.auto_fix.auto_fix(check, &self.ctx, &mut check_issues).await {
                    fix_successes += 1;
                }
            }

            let elapsed_ms = check_start.elapsed().as_millis() as f64;
            metrics.insert(format!("{}_duration_ms", check.name()), elapsed_ms);
            metrics.insert(
                format!("{}_issue_count", check.name()),
                check_issues.len() as f64,
            );

            info!(
                run_id = %run_id,
                check = check.name(),
                issues = check_issues.len(),
                duration_ms = elapsed_ms,
                "Check completed"
            );
            all_issues.extend(check_issues);
        }

        metrics.insert("checks_run".to_string(), self.checks.len() as f64);
        metrics.insert("issues_total".to_string(), all_issues.len() as f64);
        metrics.insert("auto_fix_attempts".to_string(), fix_attempts as f64);
        metrics.insert("auto_fix_successes".to_string(), fix_successes as f64);

        // Never truncate to zero: an emptied list would derive `passed` and
        // hide that the run failed.
        let report_cap = self.ctx.config.max_issues_reported.max(1);
        if all_issues.len() > report_cap {
            warn!(
                run_id = %run_id,
                total = all_issues.len(),
                reported = report_cap,
                "Truncating reported issues"
            );
            all_issues.truncate(report_cap);
        }

        let result = ConsistencyResult::from_issues(
            run_id,
            all_issues,
            metrics,
            started_at,
            run_start.elapsed().as_millis() as u64,
        );

        info!(
            run_id = %run_id,
            passed = result.passed(),
            issues = result.issues().len(),
            duration_ms = result.duration_ms,
            "Full validation completed"
        );

        self.history.write().await.push(result.clone());
        Ok(result)
    }

    /// Append-only history of past validation runs, oldest first.
    pub async fn history(&self) -> Vec<ConsistencyResult> {
        self.history.read().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Criticality;
    use crate::test_helpers::{
        test_stores, FailingCheck, ScriptedCheck, test_local_subscription,
    };
    use async_trait::async_trait;

    struct FixableEmitterWithoutFix;

    #[async_trait]
    impl ConsistencyCheck for FixableEmitterWithoutFix {
        fn name(&self) -> &str {
            "fixable_emitter_without_fix"
        }
        fn description(&self) -> &str {
            "emits a fixable issue while declaring no auto-fix"
        }
        fn criticality(&self) -> Criticality {
            Criticality::Low
        }
        fn issue_types(&self) -> Vec<String> {
            vec!["bogus".to_string()]
        }
        async fn run(&self, _ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
            Ok(vec![ConsistencyIssue {
                issue_type: "bogus".to_string(),
                description: "claims fixability".to_string(),
                severity: IssueSeverity::Warning,
                affected_records: Vec::new(),
                suggested_fix: None,
                auto_fixable: true,
            }])
        }
    }

    #[tokio::test]
    async fn one_throwing_check_does_not_stop_the_batch() {
        let (store, provider) = test_stores();
        let scripted = Arc::new(ScriptedCheck::passing("always_green"));
        let invocations = scripted.invocations();
        let validator = ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![
                Arc::new(FailingCheck::new("exploding_check")),
                scripted,
            ],
        );

        let result = validator
            .run_full_validation(&CancellationToken::new())
            .await
            .unwrap();

        // The fault became a synthetic issue and the second check still ran.
        assert!(!result.passed());
        assert_eq!(result.issues().len(), 1);
        assert_eq!(result.issues()[0].issue_type, VALIDATION_ERROR);
        assert_eq!(result.issues()[0].severity, IssueSeverity::Critical);
        assert!(!result.issues()[0].auto_fixable);
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn passed_matches_issue_emptiness() {
        let (store, provider) = test_stores();
        let validator = ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![Arc::new(ScriptedCheck::passing("always_green"))],
        );
        let result = validator
            .run_full_validation(&CancellationToken::new())
            .await
            .unwrap();
        assert!(result.passed());
        assert!(result.issues().is_empty());
    }

    #[tokio::test]
    async fn fixable_flag_is_cleared_when_check_has_no_auto_fix() {
        let (store, provider) = test_stores();
        let validator = ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![Arc::new(FixableEmitterWithoutFix)],
        );
        let result = validator
            .run_full_validation(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.issues().len(), 1);
        assert!(!result.issues()[0].auto_fixable);
    }

    #[tokio::test]
    async fn truncation_caps_issues_but_keeps_the_failure() {
        let (store, provider) = test_stores();
        let validator = ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig {
                max_issues_reported: 2,
                ..ReconcilerConfig::default()
            },
            vec![
                Arc::new(ScriptedCheck::critical("first_red")) as Arc<dyn ConsistencyCheck>,
                Arc::new(ScriptedCheck::critical("second_red")),
                Arc::new(ScriptedCheck::critical("third_red")),
            ],
        );
        let result = validator
            .run_full_validation(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.passed());
        assert_eq!(result.issues().len(), 2);
        assert_eq!(result.metrics["issues_total"], 3.0);
    }

    #[tokio::test]
    async fn zero_report_cap_still_reports_the_failure() {
        let (store, provider) = test_stores();
        let validator = ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig {
                max_issues_reported: 0,
                ..ReconcilerConfig::default()
            },
            vec![Arc::new(ScriptedCheck::critical("always_critical")) as Arc<dyn ConsistencyCheck>],
        );
        let result = validator
            .run_full_validation(&CancellationToken::new())
            .await
            .unwrap();

        // The cap clamps to one so a failing run can never be emptied into
        // a passing one.
        assert!(!result.passed());
        assert_eq!(result.issues().len(), 1);
        assert_eq!(result.metrics["issues_total"], 1.0);
    }

    #[tokio::test]
    async fn cancellation_between_checks_aborts_with_cancelled() {
        let (store, provider) = test_stores();
        let validator = ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![Arc::new(ScriptedCheck::passing("never_runs"))],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = validator.run_full_validation(&cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn history_accumulates_runs() {
        let (store, provider) = test_stores();
        store
            .insert_subscription(test_local_subscription("active", None))
            .await;
        let validator = ConsistencyValidator::new(
            store.clone(),
            provider,
            ReconcilerConfig::default(),
        );
        let cancel = CancellationToken::new();
        validator.run_full_validation(&cancel).await.unwrap();
        validator.run_full_validation(&cancel).await.unwrap();
        assert_eq!(validator.history().await.len(), 2);
        validator.clear_history().await;
        assert!(validator.history().await.is_empty());
    }
}
