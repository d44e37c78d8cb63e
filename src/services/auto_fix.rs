//! Auto-fix engine.
//!
//! Applies a check's corrective action to its auto-fixable issues, re-runs
//! the same check once, and removes from the aggregate exactly those issues
//! the re-check no longer reports. No retries within a validation pass;
//! retries belong to the scheduler.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::models::ConsistencyIssue;
use crate::services::checks::{CheckContext, ConsistencyCheck};

#[derive(Default)]
pub struct AutoFixEngine;

impl AutoFixEngine {
    pub fn new() -> Self {
        Self
    }

    /// Attempt to fix `check`'s auto-fixable issues in `aggregate`.
    ///
    /// Returns `true` when every auto-fixable issue the check produced was
    /// verified resolved by the re-check. Failures are logged and counted,
    /// never propagated: an auto-fix fault must not poison the validation
    /// run.
    #[instrument(skip(self, check, ctx, aggregate), fields(check = check.name()))]
    pub async fn auto_fix(
        &self,
        check: &Arc<dyn ConsistencyCheck>,
        ctx: &CheckContext,
        aggregate: &mut Vec<ConsistencyIssue>,
    ) -> bool {
        let fixable: Vec<ConsistencyIssue> = aggregate
            .iter()
            .filter(|issue| issue.auto_fixable)
            .cloned()
            .collect();
        if fixable.is_empty() {
            return true;
        }

        info!(fixable = fixable.len(), "Applying auto-fix");

        if let Err(err) = check.apply_fix(ctx, &fixable).await {
            warn!(error = %err, "Auto-fix action failed; issues retained");
            return false;
        }

        // Synchronous re-verification within the same pass.
        let remaining = match check.run(ctx).await {
            Ok(issues) => issues,
            Err(err) => {
                warn!(error = %err, "Re-check after auto-fix failed; issues retained");
                return false;
            }
        };

        let mut resolved = 0usize;
        aggregate.retain(|issue| {
            let was_fixable = fixable.iter().any(|candidate| candidate.same_issue(issue));
            if !was_fixable {
                return true;
            }
            let still_present = remaining.iter().any(|left| left.same_issue(issue));
            if !still_present {
                resolved += 1;
            }
            still_present
        });

        let unresolved = fixable.len() - resolved;
        if unresolved > 0 {
            warn!(
                resolved = resolved,
                unresolved = unresolved,
                "Auto-fix left issues unresolved"
            );
        } else {
            info!(resolved = resolved, "Auto-fix resolved all fixable issues");
        }
        unresolved == 0
    }
}
