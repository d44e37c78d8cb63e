//! Decision-engine scoring against the calibrated criteria, and the
//! end-to-end emergency rollback it triggers.

use std::sync::Arc;

use ledgerguard_backend::config::ReconcilerConfig;
use ledgerguard_backend::errors::AppError;
use ledgerguard_backend::services::auto_rollback::{
    AutoRollbackEngine, EmergencyPlanFactory, EMERGENCY_PLAN_ID, METRIC_AVG_RESPONSE_MS,
    METRIC_BASELINE_RESPONSE_MS, METRIC_DB_CONNECTION_FAILURES, METRIC_ERROR_RATE,
    METRIC_PAYMENT_FAILURE_RATE,
};
use ledgerguard_backend::services::rollback_executor::{PlanState, RollbackExecutor};
use ledgerguard_backend::services::RollbackCriterion;
use ledgerguard_backend::store::{InMemoryStore, LocalStore, SubscriptionFilter};
use ledgerguard_backend::test_helpers::{metrics_from, test_local_subscription};

fn engine_with_store() -> (AutoRollbackEngine, Arc<RollbackExecutor>, Arc<InMemoryStore>, Arc<EmergencyPlanFactory>) {
    let store = Arc::new(InMemoryStore::new());
    let factory = Arc::new(EmergencyPlanFactory::new(store.clone()));
    let mut executor = RollbackExecutor::new(store.clone());
    executor.register_plan(factory.clone());
    let executor = Arc::new(executor);
    let engine = AutoRollbackEngine::new(&ReconcilerConfig::default(), executor.clone());
    (engine, executor, store, factory)
}

#[tokio::test]
async fn score_below_threshold_returns_false_without_side_effects() {
    let (engine, executor, store, _factory) = engine_with_store();

    // Only the db-connection criterion (weight 0.20) triggers: 0.20 < 0.5.
    let metrics = metrics_from(&[
        (METRIC_ERROR_RATE, 0.01),
        (METRIC_AVG_RESPONSE_MS, 100.0),
        (METRIC_BASELINE_RESPONSE_MS, 100.0),
        (METRIC_DB_CONNECTION_FAILURES, 50.0),
        (METRIC_PAYMENT_FAILURE_RATE, 0.0),
    ]);

    assert!(!engine.decide(&metrics).await.unwrap());
    assert!(executor.history().await.is_empty());
    assert_eq!(store.mutation_count(), 0);
    assert!(store.external_access_enabled());
}

#[tokio::test]
async fn criteria_summing_to_threshold_trigger_exactly_one_emergency_run() {
    let (engine, executor, store, factory) = engine_with_store();
    store
        .insert_subscription(test_local_subscription("active", None))
        .await;
    let known_good = store.create_snapshot().await.unwrap();
    factory.set_known_good(known_good).await;

    // Degraded production metrics: every criterion triggers.
    let metrics = metrics_from(&[
        (METRIC_ERROR_RATE, 0.15),
        (METRIC_AVG_RESPONSE_MS, 5000.0),
        (METRIC_BASELINE_RESPONSE_MS, 1000.0),
        (METRIC_DB_CONNECTION_FAILURES, 25.0),
        (METRIC_PAYMENT_FAILURE_RATE, 0.03),
    ]);

    assert!(engine.decide(&metrics).await.unwrap());

    let history = executor.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].plan_id, EMERGENCY_PLAN_ID);
    assert_eq!(history[0].state, PlanState::Succeeded);
    assert_eq!(history[0].completed_steps, vec![1, 2]);

    // The conservative plan leaves external access disabled for an operator.
    assert!(!store.external_access_enabled());
}

#[tokio::test]
async fn emergency_restore_reverts_to_known_good_state() {
    let (engine, _executor, store, factory) = engine_with_store();

    let good = test_local_subscription("active", None);
    store.insert_owner(good.owner_id).await;
    store.insert_subscription(good.clone()).await;
    let known_good = store.create_snapshot().await.unwrap();
    factory.set_known_good(known_good).await;

    // Corrupt the store after the known-good point.
    let mut corrupted = good.clone();
    corrupted.status = "suspended".to_string();
    store.upsert_subscription(corrupted).await.unwrap();

    let metrics = metrics_from(&[
        (METRIC_ERROR_RATE, 0.5),
        (METRIC_AVG_RESPONSE_MS, 9000.0),
        (METRIC_BASELINE_RESPONSE_MS, 1000.0),
        (METRIC_DB_CONNECTION_FAILURES, 99.0),
        (METRIC_PAYMENT_FAILURE_RATE, 0.5),
    ]);
    assert!(engine.decide(&metrics).await.unwrap());

    let records = store.subscriptions(&SubscriptionFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "active");
}

#[tokio::test]
async fn custom_criteria_table_drives_the_same_scoring() {
    // New criteria slot in without touching the scoring algorithm.
    let store = Arc::new(InMemoryStore::new());
    let executor = Arc::new(RollbackExecutor::new(store.clone()));
    let config = ReconcilerConfig::default();
    let criteria = vec![
        RollbackCriterion::new("queue_depth", 0.3, |metrics| {
            metrics.get("queue_depth").copied().unwrap_or(0.0) > 1000.0
        }),
        RollbackCriterion::new("webhook_lag", 0.25, |metrics| {
            metrics.get("webhook_lag_secs").copied().unwrap_or(0.0) > 300.0
        }),
    ];
    let engine = AutoRollbackEngine::with_criteria(criteria, &config, executor);

    let triggered = metrics_from(&[("queue_depth", 5000.0), ("webhook_lag_secs", 600.0)]);
    assert!((engine.score(&triggered) - 0.55).abs() < 1e-9);

    let quiet = metrics_from(&[("queue_depth", 10.0)]);
    assert!(engine.score(&quiet).abs() < f64::EPSILON);
}

#[tokio::test]
async fn unregistered_emergency_plan_surfaces_unknown_plan() {
    let store = Arc::new(InMemoryStore::new());
    // No factory registered.
    let executor = Arc::new(RollbackExecutor::new(store));
    let engine = AutoRollbackEngine::new(&ReconcilerConfig::default(), executor);

    let metrics = metrics_from(&[
        (METRIC_ERROR_RATE, 0.5),
        (METRIC_DB_CONNECTION_FAILURES, 99.0),
        (METRIC_PAYMENT_FAILURE_RATE, 0.5),
    ]);
    let result = engine.decide(&metrics).await;
    assert!(matches!(result, Err(AppError::UnknownPlan(_))));
}
