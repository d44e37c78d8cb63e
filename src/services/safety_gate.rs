//! Safety gate: pre-execution checks that can veto a rollback plan before
//! any mutation occurs.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::errors::AppError;

/// A single pre-flight safety check. Typical implementations ask "is there
/// live traffic, an open transaction, or a pending external event touching
/// the resource this plan will mutate".
#[async_trait]
pub trait SafetyCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failure of this check vetoes the whole plan. Non-blocking
    /// checks are advisory; their failure is recorded, not enforced.
    fn block_rollback(&self) -> bool;

    async fn check(&self) -> Result<bool, AppError>;
}

/// A non-blocking safety check that failed; surfaced to the caller for
/// logging and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAdvisory {
    pub check_name: String,
    pub detail: String,
}

#[derive(Default)]
pub struct SafetyGate;

impl SafetyGate {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every safety check of a plan. Checks are read-only and run
    /// concurrently, but all complete before this returns — and therefore
    /// before any step executes.
    ///
    /// Returns advisories from failing non-blocking checks; fails with
    /// [`AppError::SafetyBlocked`] if any blocking check fails. A check
    /// execution fault counts as a failure of that check.
    #[instrument(skip(self, checks))]
    pub async fn check_safety(
        &self,
        plan_id: &str,
        checks: &[Arc<dyn SafetyCheck>],
    ) -> Result<Vec<SafetyAdvisory>, AppError> {
        let outcomes = join_all(checks.iter().map(|check| async move {
            let passed = match check.check().await {
                Ok(passed) => passed,
                Err(err) => {
                    error!(check = check.name(), error = %err, "Safety check execution fault");
                    false
                }
            };
            (check, passed)
        }))
        .await;

        let mut blocked = Vec::new();
        let mut advisories = Vec::new();
        for (check, passed) in outcomes {
            if passed {
                continue;
            }
            if check.block_rollback() {
                error!(check = check.name(), "Blocking safety check failed");
                blocked.push(check.name().to_string());
            } else {
                warn!(check = check.name(), "Advisory safety check failed; continuing");
                advisories.push(SafetyAdvisory {
                    check_name: check.name().to_string(),
                    detail: "advisory safety check failed".to_string(),
                });
            }
        }

        if !blocked.is_empty() {
            return Err(AppError::SafetyBlocked {
                plan_id: plan_id.to_string(),
                failed_checks: blocked,
            });
        }

        info!(
            checks = checks.len(),
            advisories = advisories.len(),
            "Safety gate passed"
        );
        Ok(advisories)
    }
}
