//! Rollback plan executor.
//!
//! Runs an ordered sequence of reversible steps with per-step validation,
//! gated by pre-flight safety checks and followed by plan-level validation.
//! Every execution is recorded for audit, including how far a failed or
//! cancelled run got, so a resume/compensate decision can be made later.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::services::safety_gate::{SafetyCheck, SafetyGate};
use crate::store::LocalStore;

/// A side-effecting rollback operation with its own post-condition and
/// optional compensation.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Perform the step's mutation.
    async fn act(&self) -> Result<(), AppError>;

    /// Post-condition predicate, run immediately after `act`.
    async fn validate(&self) -> Result<bool, AppError>;

    /// Step-level compensating rollback, invoked at most once when the step
    /// fails and the owning [`RollbackStep`] has `rollback_on_failure`.
    async fn compensate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct RollbackStep {
    /// Strictly increasing within a plan; defines execution sequence.
    pub order: u32,
    pub description: String,
    pub rollback_on_failure: bool,
    pub action: Arc<dyn StepAction>,
}

/// Plan-level post-execution check; validates global invariants the
/// individual step post-conditions cannot see.
#[async_trait]
pub trait ValidationCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failure of this check fails the whole plan.
    fn critical(&self) -> bool;

    async fn check(&self) -> Result<bool, AppError>;
}

/// An ordered, reversible sequence of operations to undo a deployed change.
/// Built immediately before execution and read-only while it runs.
pub struct RollbackPlan {
    pub id: String,
    pub description: String,
    steps: Vec<RollbackStep>,
    pub validation_checks: Vec<Arc<dyn ValidationCheck>>,
    pub safety_checks: Vec<Arc<dyn SafetyCheck>>,
}

impl RollbackPlan {
    /// Build a plan, sorting steps into ascending order and rejecting
    /// duplicate order values.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        mut steps: Vec<RollbackStep>,
        validation_checks: Vec<Arc<dyn ValidationCheck>>,
        safety_checks: Vec<Arc<dyn SafetyCheck>>,
    ) -> Result<Self, AppError> {
        let id = id.into();
        steps.sort_by_key(|step| step.order);
        if steps.windows(2).any(|pair| pair[0].order == pair[1].order) {
            return Err(AppError::InvalidPlan {
                plan_id: id,
                message: "duplicate step order values".to_string(),
            });
        }
        Ok(Self {
            id,
            description: description.into(),
            steps,
            validation_checks,
            safety_checks,
        })
    }

    pub fn steps(&self) -> &[RollbackStep] {
        &self.steps
    }
}

/// Lifecycle of one plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Pending,
    Blocked,
    SafetyChecked,
    SnapshotTaken,
    Executing,
    Validating,
    Succeeded,
    Failed,
    StepRolledBack,
    Cancelled,
}

/// Audit record of one plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackExecutionRecord {
    pub execution_id: Uuid,
    pub plan_id: String,
    pub state: PlanState,
    /// Orders of the steps whose action and validation both completed.
    pub completed_steps: Vec<u32>,
    pub snapshot: Option<String>,
    pub advisories: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Builds a plan fresh immediately before execution; plans are never
/// persisted.
#[async_trait]
pub trait PlanFactory: Send + Sync {
    fn plan_id(&self) -> &str;

    async fn build(&self) -> Result<RollbackPlan, AppError>;
}

pub struct RollbackExecutor {
    store: Arc<dyn LocalStore>,
    gate: SafetyGate,
    factories: HashMap<String, Arc<dyn PlanFactory>>,
    history: RwLock<Vec<RollbackExecutionRecord>>,
}

impl RollbackExecutor {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            gate: SafetyGate::new(),
            factories: HashMap::new(),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Register a plan factory under its plan id for
    /// [`RollbackExecutor::execute_rollback`].
    pub fn register_plan(&mut self, factory: Arc<dyn PlanFactory>) {
        self.factories.insert(factory.plan_id().to_string(), factory);
    }

    /// Build the registered plan `plan_id` and execute it.
    #[instrument(skip(self, cancel))]
    pub async fn execute_rollback(
        &self,
        plan_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RollbackExecutionRecord, AppError> {
        let factory = self
            .factories
            .get(plan_id)
            .ok_or_else(|| AppError::UnknownPlan(plan_id.to_string()))?;
        let plan = factory.build().await?;
        self.execute(&plan, cancel).await
    }

    /// Execute a plan: safety gate, snapshot, ordered steps, plan-level
    /// validation. Either fully succeeds, is fully blocked before any
    /// mutation, or fails loudly with enough recorded detail to resume
    /// manually.
    #[instrument(skip(self, plan, cancel), fields(plan_id = %plan.id))]
    pub async fn execute(
        &self,
        plan: &RollbackPlan,
        cancel: &CancellationToken,
    ) -> Result<RollbackExecutionRecord, AppError> {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            execution_id = %execution_id,
            steps = plan.steps().len(),
            "Starting rollback plan execution"
        );

        let mut record = RollbackExecutionRecord {
            execution_id,
            plan_id: plan.id.clone(),
            state: PlanState::Pending,
            completed_steps: Vec::new(),
            snapshot: None,
            advisories: Vec::new(),
            error: None,
            started_at,
            finished_at: started_at,
        };

        // 1. Safety gate. All-or-nothing: if blocked, zero steps run and no
        //    snapshot is taken.
        match self.gate.check_safety(&plan.id, &plan.safety_checks).await {
            Ok(advisories) => {
                record.advisories = advisories
                    .into_iter()
                    .map(|advisory| advisory.check_name)
                    .collect();
                record.state = PlanState::SafetyChecked;
            }
            Err(err) => {
                record.state = PlanState::Blocked;
                return self.finish(record, Err(err)).await;
            }
        }

        // 2. Mandatory recoverability point before any mutation.
        match self.store.create_snapshot().await {
            Ok(handle) => {
                info!(snapshot = %handle, "Snapshot captured");
                record.snapshot = Some(handle);
                record.state = PlanState::SnapshotTaken;
            }
            Err(err) => {
                let err = AppError::SnapshotError {
                    plan_id: plan.id.clone(),
                    message: err.to_string(),
                };
                record.state = PlanState::Failed;
                return self.finish(record, Err(err)).await;
            }
        }

        // 3. Steps, strictly sequential in ascending order.
        record.state = PlanState::Executing;
        for step in plan.steps() {
            if cancel.is_cancelled() {
                warn!(
                    step_order = step.order,
                    completed = record.completed_steps.len(),
                    "Rollback cancelled between steps"
                );
                record.state = PlanState::Cancelled;
                let err = AppError::Cancelled(format!(
                    "rollback plan '{}' cancelled before step {}; completed steps recorded",
                    plan.id, step.order
                ));
                return self.finish(record, Err(err)).await;
            }

            info!(step_order = step.order, description = %step.description, "Executing step");

            let step_result = match step.action.act().await {
                Err(err) => Err(format!("action failed: {err}")),
                Ok(()) => match step.action.validate().await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("validation returned false".to_string()),
                    Err(err) => Err(format!("validation failed to execute: {err}")),
                },
            };

            match step_result {
                Ok(()) => record.completed_steps.push(step.order),
                Err(message) => {
                    error!(step_order = step.order, message = %message, "Step failed");
                    let mut compensated = false;
                    if step.rollback_on_failure {
                        // Compensate this step only, then propagate.
                        match step.action.compensate().await {
                            Ok(()) => {
                                compensated = true;
                                record.state = PlanState::StepRolledBack;
                                info!(step_order = step.order, "Step compensation applied");
                            }
                            Err(err) => {
                                record.state = PlanState::Failed;
                                error!(
                                    step_order = step.order,
                                    error = %err,
                                    "Step compensation failed"
                                );
                            }
                        }
                    } else {
                        record.state = PlanState::Failed;
                    }
                    let err = AppError::StepFailed {
                        plan_id: plan.id.clone(),
                        step_order: step.order,
                        compensated,
                        message,
                    };
                    return self.finish(record, Err(err)).await;
                }
            }
        }

        // 4. Plan-level validation: global invariants across the whole store.
        record.state = PlanState::Validating;
        let mut failed_critical = Vec::new();
        for check in &plan.validation_checks {
            let passed = match check.check().await {
                Ok(passed) => passed,
                Err(err) => {
                    error!(check = check.name(), error = %err, "Validation check execution fault");
                    false
                }
            };
            if passed {
                continue;
            }
            if check.critical() {
                error!(check = check.name(), "Critical plan-level validation failed");
                failed_critical.push(check.name().to_string());
            } else {
                warn!(check = check.name(), "Non-critical plan-level validation failed");
            }
        }
        if !failed_critical.is_empty() {
            record.state = PlanState::Failed;
            let err = AppError::PlanValidationFailed {
                plan_id: plan.id.clone(),
                failed_checks: failed_critical,
            };
            return self.finish(record, Err(err)).await;
        }

        record.state = PlanState::Succeeded;
        info!(
            execution_id = %execution_id,
            completed_steps = record.completed_steps.len(),
            "Rollback plan succeeded"
        );
        self.finish(record, Ok(())).await
    }

    async fn finish(
        &self,
        mut record: RollbackExecutionRecord,
        outcome: Result<(), AppError>,
    ) -> Result<RollbackExecutionRecord, AppError> {
        record.finished_at = Utc::now();
        if let Err(err) = &outcome {
            record.error = Some(err.to_string());
        }
        self.history.write().await.push(record.clone());
        outcome.map(|_| record)
    }

    /// Audit history of plan executions, oldest first.
    pub async fn history(&self) -> Vec<RollbackExecutionRecord> {
        self.history.read().await.clone()
    }
}
