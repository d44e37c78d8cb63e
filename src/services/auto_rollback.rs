//! Auto-rollback decision engine.
//!
//! Scores live operational metrics against a table of weighted criteria and
//! triggers the emergency rollback plan when the score crosses the
//! configured threshold. The criteria table is data, not branching: new
//! criteria can be added without touching the scoring algorithm.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcilerConfig;
use crate::errors::AppError;
use crate::services::rollback_executor::{
    PlanFactory, RollbackExecutor, RollbackPlan, RollbackStep, StepAction, ValidationCheck,
};
use crate::store::{LocalStore, SubscriptionFilter};

pub const EMERGENCY_PLAN_ID: &str = "emergency-rollback";

// Metric keys expected in the live metrics map.
pub const METRIC_ERROR_RATE: &str = "error_rate";
pub const METRIC_AVG_RESPONSE_MS: &str = "avg_response_time_ms";
pub const METRIC_BASELINE_RESPONSE_MS: &str = "baseline_response_time_ms";
pub const METRIC_DB_CONNECTION_FAILURES: &str = "db_connection_failures";
pub const METRIC_PAYMENT_FAILURE_RATE: &str = "payment_failure_rate";

type MetricPredicate = Box<dyn Fn(&HashMap<String, f64>) -> bool + Send + Sync>;

/// One row of the decision table.
pub struct RollbackCriterion {
    pub name: String,
    /// Weight in `[0, 1]`; the decision threshold is calibrated against the
    /// sum of all weights, which need not be exactly 1.
    pub weight: f64,
    predicate: MetricPredicate,
}

impl RollbackCriterion {
    pub fn new(
        name: impl Into<String>,
        weight: f64,
        predicate: impl Fn(&HashMap<String, f64>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            weight,
            predicate: Box::new(predicate),
        }
    }

    fn evaluate(&self, metrics: &HashMap<String, f64>) -> bool {
        (self.predicate)(metrics)
    }
}

fn metric(metrics: &HashMap<String, f64>, key: &str) -> Option<f64> {
    let value = metrics.get(key).copied();
    if value.is_none() {
        debug!(key = key, "Metric missing; criterion evaluates false");
    }
    value
}

/// The default calibration, entirely driven by [`ReconcilerConfig`].
pub fn default_criteria(config: &ReconcilerConfig) -> Vec<RollbackCriterion> {
    let error_rate_threshold = config.error_rate_threshold;
    let latency_multiplier = config.latency_multiplier_threshold;
    let db_failure_threshold = config.db_connection_failure_threshold;
    let payment_threshold = config.payment_failure_rate_threshold;

    vec![
        RollbackCriterion::new("high_error_rate", config.error_rate_weight, move |metrics| {
            metric(metrics, METRIC_ERROR_RATE).map_or(false, |rate| rate > error_rate_threshold)
        }),
        RollbackCriterion::new("latency_degradation", config.latency_weight, move |metrics| {
            match (
                metric(metrics, METRIC_AVG_RESPONSE_MS),
                metric(metrics, METRIC_BASELINE_RESPONSE_MS),
            ) {
                (Some(avg), Some(baseline)) if baseline > 0.0 => {
                    avg >= baseline * latency_multiplier
                }
                _ => false,
            }
        }),
        RollbackCriterion::new(
            "db_connection_failures",
            config.db_connection_failure_weight,
            move |metrics| {
                metric(metrics, METRIC_DB_CONNECTION_FAILURES)
                    .map_or(false, |count| count > db_failure_threshold)
            },
        ),
        RollbackCriterion::new(
            "payment_failure_rate",
            config.payment_failure_rate_weight,
            move |metrics| {
                metric(metrics, METRIC_PAYMENT_FAILURE_RATE)
                    .map_or(false, |rate| rate > payment_threshold)
            },
        ),
    ]
}

/// Scores metrics and, when warranted, runs the emergency rollback plan.
pub struct AutoRollbackEngine {
    criteria: Vec<RollbackCriterion>,
    executor: Arc<RollbackExecutor>,
    emergency_plan_id: String,
    score_threshold: f64,
}

impl AutoRollbackEngine {
    pub fn new(config: &ReconcilerConfig, executor: Arc<RollbackExecutor>) -> Self {
        Self::with_criteria(default_criteria(config), config, executor)
    }

    pub fn with_criteria(
        criteria: Vec<RollbackCriterion>,
        config: &ReconcilerConfig,
        executor: Arc<RollbackExecutor>,
    ) -> Self {
        Self {
            criteria,
            executor,
            emergency_plan_id: EMERGENCY_PLAN_ID.to_string(),
            score_threshold: config.rollback_score_threshold,
        }
    }

    /// Score the triggered criteria: `sum(weight_i)` over every criterion
    /// whose predicate holds.
    pub fn score(&self, metrics: &HashMap<String, f64>) -> f64 {
        let mut score = 0.0;
        for criterion in &self.criteria {
            let triggered = criterion.evaluate(metrics);
            debug!(
                criterion = %criterion.name,
                weight = criterion.weight,
                triggered = triggered,
                "Evaluated rollback criterion"
            );
            if triggered {
                score += criterion.weight;
            }
        }
        score
    }

    /// Decide whether live metrics warrant an emergency rollback. When they
    /// do, the emergency plan executes exactly once before this returns
    /// `true`; otherwise `false` with no side effects.
    #[instrument(skip(self, metrics))]
    pub async fn decide(&self, metrics: &HashMap<String, f64>) -> Result<bool, AppError> {
        let score = self.score(metrics);
        let should_rollback = score >= self.score_threshold;

        info!(
            score = score,
            threshold = self.score_threshold,
            should_rollback = should_rollback,
            "Auto-rollback decision computed"
        );

        if !should_rollback {
            return Ok(false);
        }

        warn!(score = score, "Triggering emergency rollback");
        self.executor
            .execute_rollback(&self.emergency_plan_id, &CancellationToken::new())
            .await?;
        Ok(true)
    }
}

/// Builds the maximally conservative emergency plan: disable external
/// access, restore the last known-good snapshot, then re-validate that the
/// store serves reads. External access stays disabled for an operator to
/// re-enable after inspection.
pub struct EmergencyPlanFactory {
    store: Arc<dyn LocalStore>,
    known_good_snapshot: RwLock<Option<String>>,
}

impl EmergencyPlanFactory {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            known_good_snapshot: RwLock::new(None),
        }
    }

    /// Record the snapshot handle considered last-known-good; typically set
    /// after each fully passing validation run.
    pub async fn set_known_good(&self, handle: String) {
        *self.known_good_snapshot.write().await = Some(handle);
    }
}

struct DisableAccessAction {
    store: Arc<dyn LocalStore>,
}

#[async_trait]
impl StepAction for DisableAccessAction {
    async fn act(&self) -> Result<(), AppError> {
        self.store.set_external_access(false).await
    }

    async fn validate(&self) -> Result<bool, AppError> {
        Ok(true)
    }

    async fn compensate(&self) -> Result<(), AppError> {
        self.store.set_external_access(true).await
    }
}

struct RestoreSnapshotAction {
    store: Arc<dyn LocalStore>,
    handle: Option<String>,
}

#[async_trait]
impl StepAction for RestoreSnapshotAction {
    async fn act(&self) -> Result<(), AppError> {
        let handle = self.handle.as_ref().ok_or_else(|| {
            AppError::StoreError("no known-good snapshot recorded".to_string())
        })?;
        self.store.restore_snapshot(handle).await
    }

    async fn validate(&self) -> Result<bool, AppError> {
        // The restored store must serve reads.
        self.store
            .subscriptions(&SubscriptionFilter::default())
            .await
            .map(|_| true)
    }
}

struct StoreReadableCheck {
    store: Arc<dyn LocalStore>,
}

#[async_trait]
impl ValidationCheck for StoreReadableCheck {
    fn name(&self) -> &str {
        "local_store_readable"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> Result<bool, AppError> {
        self.store
            .subscriptions(&SubscriptionFilter::default())
            .await
            .map(|_| true)
    }
}

#[async_trait]
impl PlanFactory for EmergencyPlanFactory {
    fn plan_id(&self) -> &str {
        EMERGENCY_PLAN_ID
    }

    async fn build(&self) -> Result<RollbackPlan, AppError> {
        let handle = self.known_good_snapshot.read().await.clone();
        RollbackPlan::new(
            EMERGENCY_PLAN_ID,
            "disable external access, restore last known-good snapshot, re-validate",
            vec![
                RollbackStep {
                    order: 1,
                    description: "disable external access".to_string(),
                    rollback_on_failure: true,
                    action: Arc::new(DisableAccessAction {
                        store: self.store.clone(),
                    }),
                },
                RollbackStep {
                    order: 2,
                    description: "restore last known-good snapshot".to_string(),
                    rollback_on_failure: false,
                    action: Arc::new(RestoreSnapshotAction {
                        store: self.store.clone(),
                        handle,
                    }),
                },
            ],
            vec![Arc::new(StoreReadableCheck {
                store: self.store.clone(),
            })],
            vec![],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::test_helpers::test_local_subscription;

    fn engine_with_emergency_plan() -> (AutoRollbackEngine, Arc<RollbackExecutor>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let mut executor = RollbackExecutor::new(store.clone());
        let factory = Arc::new(EmergencyPlanFactory::new(store.clone()));
        executor.register_plan(factory);
        let executor = Arc::new(executor);
        let config = ReconcilerConfig::default();
        (
            AutoRollbackEngine::new(&config, executor.clone()),
            executor,
            store,
        )
    }

    fn healthy_metrics() -> HashMap<String, f64> {
        HashMap::from([
            (METRIC_ERROR_RATE.to_string(), 0.001),
            (METRIC_AVG_RESPONSE_MS.to_string(), 120.0),
            (METRIC_BASELINE_RESPONSE_MS.to_string(), 100.0),
            (METRIC_DB_CONNECTION_FAILURES.to_string(), 0.0),
            (METRIC_PAYMENT_FAILURE_RATE.to_string(), 0.0),
        ])
    }

    #[tokio::test]
    async fn healthy_metrics_do_not_trigger() {
        let (engine, executor, _store) = engine_with_emergency_plan();
        let decided = engine.decide(&healthy_metrics()).await.unwrap();
        assert!(!decided);
        assert!(executor.history().await.is_empty());
    }

    #[tokio::test]
    async fn two_triggered_criteria_summing_past_threshold_roll_back() {
        let (engine, _executor, _store) = engine_with_emergency_plan();

        // error_rate (0.30) + latency (0.25) = 0.55 >= 0.5.
        let mut metrics = healthy_metrics();
        metrics.insert(METRIC_ERROR_RATE.to_string(), 0.10);
        metrics.insert(METRIC_AVG_RESPONSE_MS.to_string(), 500.0);

        let score = engine.score(&metrics);
        assert!((score - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_metric_keys_evaluate_false() {
        let (engine, _executor, _store) = engine_with_emergency_plan();
        let score = engine.score(&HashMap::new());
        assert!(score.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn emergency_rollback_runs_exactly_once_and_disables_access() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_subscription(test_local_subscription("active", None))
            .await;

        let factory = Arc::new(EmergencyPlanFactory::new(store.clone()));
        let handle = store.create_snapshot().await.unwrap();
        factory.set_known_good(handle).await;

        let mut executor = RollbackExecutor::new(store.clone());
        executor.register_plan(factory);
        let executor = Arc::new(executor);
        let engine = AutoRollbackEngine::new(&ReconcilerConfig::default(), executor.clone());

        // Scenario calibration: error rate 0.15, 5x latency, 25 db failures,
        // payment failures below threshold.
        let metrics = HashMap::from([
            (METRIC_ERROR_RATE.to_string(), 0.15),
            (METRIC_AVG_RESPONSE_MS.to_string(), 5000.0),
            (METRIC_BASELINE_RESPONSE_MS.to_string(), 1000.0),
            (METRIC_DB_CONNECTION_FAILURES.to_string(), 25.0),
            (METRIC_PAYMENT_FAILURE_RATE.to_string(), 0.03),
        ]);

        let decided = engine.decide(&metrics).await.unwrap();
        assert!(decided);

        let history = executor.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].plan_id, EMERGENCY_PLAN_ID);
        assert!(!store.external_access_enabled());
    }

    #[tokio::test]
    async fn no_known_good_snapshot_fails_loudly() {
        let (engine, _executor, _store) = engine_with_emergency_plan();
        let mut metrics = healthy_metrics();
        metrics.insert(METRIC_ERROR_RATE.to_string(), 0.5);
        metrics.insert(METRIC_DB_CONNECTION_FAILURES.to_string(), 100.0);
        metrics.insert(METRIC_PAYMENT_FAILURE_RATE.to_string(), 0.5);

        let result = engine.decide(&metrics).await;
        assert!(matches!(result, Err(AppError::StepFailed { .. })));
    }
}
