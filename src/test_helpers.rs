//! Shared test support: counting mocks for checks, steps, safety and
//! validation checks, plus builders for subscription fixtures. Used by the
//! inline unit tests and the integration suites under `tests/`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::errors::AppError;
use crate::models::{
    ConsistencyIssue, Criticality, IssueSeverity, LocalSubscription, RemoteSubscription,
};
use crate::services::checks::{CheckContext, ConsistencyCheck};
use crate::services::periodic_validation::AlertSink;
use crate::services::rollback_executor::{StepAction, ValidationCheck};
use crate::services::safety_gate::SafetyCheck;
use crate::store::{InMemoryProvider, InMemoryStore};

pub fn test_stores() -> (Arc<InMemoryStore>, Arc<InMemoryProvider>) {
    (Arc::new(InMemoryStore::new()), Arc::new(InMemoryProvider::new()))
}

pub fn test_context(
    config: ReconcilerConfig,
) -> (CheckContext, Arc<InMemoryStore>, Arc<InMemoryProvider>) {
    let (store, provider) = test_stores();
    let ctx = CheckContext::new(store.clone(), provider.clone(), config);
    (ctx, store, provider)
}

fn fixed_period_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn fixed_period_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// A local subscription with a fresh owner and deterministic billing period.
pub fn test_local_subscription(status: &str, remote_id: Option<&str>) -> LocalSubscription {
    LocalSubscription {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        status: status.to_string(),
        amount_cents: 1500,
        currency: "usd".to_string(),
        current_period_start: fixed_period_start(),
        current_period_end: fixed_period_end(),
        remote_id: remote_id.map(|id| id.to_string()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// The provider-side counterpart, sharing the deterministic billing period
/// so parity tests only diverge where they mean to.
pub fn test_remote_subscription(id: &str, status: &str, amount_cents: i64) -> RemoteSubscription {
    RemoteSubscription {
        id: id.to_string(),
        status: status.to_string(),
        amount_cents,
        currency: "usd".to_string(),
        current_period_start: fixed_period_start(),
        current_period_end: fixed_period_end(),
    }
}

enum ScriptedOutcome {
    Pass,
    Critical,
}

/// A check with a scripted outcome and an invocation counter.
pub struct ScriptedCheck {
    name: String,
    outcome: ScriptedOutcome,
    invocations: Arc<AtomicUsize>,
}

impl ScriptedCheck {
    pub fn passing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: ScriptedOutcome::Pass,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn critical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: ScriptedOutcome::Critical,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn invocations(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

#[async_trait]
impl ConsistencyCheck for ScriptedCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test check"
    }

    fn criticality(&self) -> Criticality {
        Criticality::Medium
    }

    fn issue_types(&self) -> Vec<String> {
        vec![format!("{}_issue", self.name)]
    }

    async fn run(&self, _ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            ScriptedOutcome::Pass => Ok(Vec::new()),
            ScriptedOutcome::Critical => Ok(vec![ConsistencyIssue {
                issue_type: format!("{}_issue", self.name),
                description: format!("scripted critical issue from {}", self.name),
                severity: IssueSeverity::Critical,
                affected_records: Vec::new(),
                suggested_fix: None,
                auto_fixable: false,
            }]),
        }
    }
}

/// A check whose execution always faults.
pub struct FailingCheck {
    name: String,
}

impl FailingCheck {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ConsistencyCheck for FailingCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "check that always faults"
    }

    fn criticality(&self) -> Criticality {
        Criticality::High
    }

    fn issue_types(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, _ctx: &CheckContext) -> Result<Vec<ConsistencyIssue>, AppError> {
        Err(AppError::CheckExecutionError {
            check: self.name.clone(),
            message: "simulated check fault".to_string(),
        })
    }
}

enum SafetyOutcome {
    Pass,
    Fail,
    Error,
}

/// A safety check with a fixed outcome.
pub struct StaticSafetyCheck {
    name: String,
    block: bool,
    outcome: SafetyOutcome,
}

impl StaticSafetyCheck {
    pub fn passing(name: &str, block: bool) -> Self {
        Self {
            name: name.to_string(),
            block,
            outcome: SafetyOutcome::Pass,
        }
    }

    pub fn failing(name: &str, block: bool) -> Self {
        Self {
            name: name.to_string(),
            block,
            outcome: SafetyOutcome::Fail,
        }
    }

    pub fn erroring(name: &str, block: bool) -> Self {
        Self {
            name: name.to_string(),
            block,
            outcome: SafetyOutcome::Error,
        }
    }
}

#[async_trait]
impl SafetyCheck for StaticSafetyCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_rollback(&self) -> bool {
        self.block
    }

    async fn check(&self) -> Result<bool, AppError> {
        match self.outcome {
            SafetyOutcome::Pass => Ok(true),
            SafetyOutcome::Fail => Ok(false),
            SafetyOutcome::Error => Err(AppError::InternalServerError(
                "simulated safety probe fault".to_string(),
            )),
        }
    }
}

/// A plan-level validation check with a fixed outcome.
pub struct StaticValidationCheck {
    name: String,
    critical: bool,
    pass: bool,
}

impl StaticValidationCheck {
    pub fn passing(name: &str, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            critical,
            pass: true,
        }
    }

    pub fn failing(name: &str, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            critical,
            pass: false,
        }
    }
}

#[async_trait]
impl ValidationCheck for StaticValidationCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn check(&self) -> Result<bool, AppError> {
        Ok(self.pass)
    }
}

enum ActionOutcome {
    Succeed,
    FailValidation,
    FailAct,
    CancelAfterAct(CancellationToken),
    Sequenced(u32, Arc<Mutex<Vec<u32>>>),
}

/// A step action that counts every call, with scriptable failure modes.
pub struct CountingAction {
    outcome: ActionOutcome,
    act_calls: AtomicUsize,
    validate_calls: AtomicUsize,
    compensate_calls: AtomicUsize,
}

impl CountingAction {
    fn with_outcome(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            act_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
            compensate_calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_outcome(ActionOutcome::Succeed)
    }

    /// Action succeeds but its post-condition predicate returns false.
    pub fn failing_validation() -> Self {
        Self::with_outcome(ActionOutcome::FailValidation)
    }

    pub fn failing_act() -> Self {
        Self::with_outcome(ActionOutcome::FailAct)
    }

    /// Succeeds, then cancels the token so the executor stops before the
    /// next step.
    pub fn cancelling_after_act(token: CancellationToken) -> Self {
        Self::with_outcome(ActionOutcome::CancelAfterAct(token))
    }

    /// Succeeds and records `tag` into the shared sequence.
    pub fn sequenced(tag: u32, sequence: Arc<Mutex<Vec<u32>>>) -> Self {
        Self::with_outcome(ActionOutcome::Sequenced(tag, sequence))
    }

    pub fn act_count(&self) -> usize {
        self.act_calls.load(Ordering::SeqCst)
    }

    pub fn validate_count(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn compensate_count(&self) -> usize {
        self.compensate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepAction for CountingAction {
    async fn act(&self) -> Result<(), AppError> {
        self.act_calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            ActionOutcome::FailAct => Err(AppError::InternalServerError(
                "simulated action failure".to_string(),
            )),
            ActionOutcome::CancelAfterAct(token) => {
                token.cancel();
                Ok(())
            }
            ActionOutcome::Sequenced(tag, sequence) => {
                sequence.lock().expect("sequence mutex poisoned").push(*tag);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn validate(&self) -> Result<bool, AppError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!matches!(self.outcome, ActionOutcome::FailValidation))
    }

    async fn compensate(&self) -> Result<(), AppError> {
        self.compensate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records raised alerts for assertion.
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<(Uuid, usize)>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().expect("alert mutex poisoned").len()
    }
}

impl Default for RecordingAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn raise(&self, run_id: Uuid, critical_issues: &[ConsistencyIssue]) {
        self.alerts
            .lock()
            .expect("alert mutex poisoned")
            .push((run_id, critical_issues.len()));
    }
}

/// Metrics map builder for decision-engine tests.
pub fn metrics_from(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), *value))
        .collect()
}
