//! Periodic validation scheduler.
//!
//! Repeatedly invokes the consistency validator on a fixed interval and
//! raises an alert callback whenever a run reports a critical issue.
//! Validation faults are logged and the loop keeps going; retrying a failed
//! pass is the next tick's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::{ConsistencyIssue, IssueSeverity};
use crate::services::consistency_validator::ConsistencyValidator;

/// Callback raised when a validation run reports critical issues.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, run_id: uuid::Uuid, critical_issues: &[ConsistencyIssue]);
}

/// Shortest accepted validation period. `tokio::time::interval` panics on a
/// zero duration, and a sub-second validation loop is a misconfiguration
/// either way.
const MIN_PERIOD: Duration = Duration::from_secs(1);

pub struct PeriodicValidationScheduler {
    validator: Arc<ConsistencyValidator>,
    alert_sink: Arc<dyn AlertSink>,
}

impl PeriodicValidationScheduler {
    pub fn new(validator: Arc<ConsistencyValidator>, alert_sink: Arc<dyn AlertSink>) -> Self {
        Self {
            validator,
            alert_sink,
        }
    }

    /// Spawn the validation loop with an interval in hours. The returned
    /// handle completes when `cancel` fires.
    pub fn spawn(self, interval_hours: u64, cancel: CancellationToken) -> JoinHandle<()> {
        self.spawn_with_period(Duration::from_secs(interval_hours * 3600), cancel)
    }

    /// Interval-agnostic variant; `spawn` is the public face, this keeps
    /// tests fast.
    pub fn spawn_with_period(self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let period = if period < MIN_PERIOD {
            warn!(
                requested_ms = period.as_millis() as u64,
                minimum_ms = MIN_PERIOD.as_millis() as u64,
                "Validation period below minimum; clamping"
            );
            MIN_PERIOD
        } else {
            period
        };
        tokio::spawn(async move {
            info!(period_secs = period.as_secs(), "Starting periodic validation loop");
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; consume it so the first
            // validation happens one full period after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Periodic validation loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once(&cancel).await;
                    }
                }
            }
        })
    }

    async fn run_once(&self, cancel: &CancellationToken) {
        match self.validator.run_full_validation(cancel).await {
            Ok(result) => {
                let critical: Vec<ConsistencyIssue> = result
                    .issues()
                    .iter()
                    .filter(|issue| issue.severity == IssueSeverity::Critical)
                    .cloned()
                    .collect();
                if critical.is_empty() {
                    info!(run_id = %result.run_id, passed = result.passed(), "Periodic validation completed");
                } else {
                    warn!(
                        run_id = %result.run_id,
                        critical = critical.len(),
                        "Periodic validation found critical issues; raising alert"
                    );
                    self.alert_sink.raise(result.run_id, &critical).await;
                }
            }
            Err(err) => {
                error!(error = %err, "Periodic validation run failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::services::checks::ConsistencyCheck;
    use crate::test_helpers::{test_stores, RecordingAlertSink, ScriptedCheck};

    #[tokio::test(start_paused = true)]
    async fn critical_issues_raise_alerts() {
        let (store, provider) = test_stores();
        let validator = Arc::new(ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![Arc::new(ScriptedCheck::critical("always_critical")) as Arc<dyn ConsistencyCheck>],
        ));
        let sink = Arc::new(RecordingAlertSink::new());
        let cancel = CancellationToken::new();
        let handle = PeriodicValidationScheduler::new(validator, sink.clone())
            .spawn_with_period(Duration::from_secs(60), cancel.clone());

        // Two periods elapse under the paused clock.
        tokio::time::sleep(Duration::from_secs(130)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.alert_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_runs_raise_no_alerts() {
        let (store, provider) = test_stores();
        let validator = Arc::new(ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![Arc::new(ScriptedCheck::passing("always_green")) as Arc<dyn ConsistencyCheck>],
        ));
        let sink = Arc::new(RecordingAlertSink::new());
        let cancel = CancellationToken::new();
        let handle = PeriodicValidationScheduler::new(validator.clone(), sink.clone())
            .spawn_with_period(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(130)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.alert_count(), 0);
        assert_eq!(validator.history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped_and_the_loop_survives() {
        let (store, provider) = test_stores();
        let validator = Arc::new(ConsistencyValidator::with_checks(
            store,
            provider,
            ReconcilerConfig::default(),
            vec![Arc::new(ScriptedCheck::critical("always_critical")) as Arc<dyn ConsistencyCheck>],
        ));
        let sink = Arc::new(RecordingAlertSink::new());
        let cancel = CancellationToken::new();
        let handle = PeriodicValidationScheduler::new(validator, sink.clone())
            .spawn(0, cancel.clone());

        // A zero interval clamps to the one-second minimum instead of
        // panicking inside the spawned task.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.expect("scheduler task must not panic");

        assert_eq!(sink.alert_count(), 2);
    }
}
