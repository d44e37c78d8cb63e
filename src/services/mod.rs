pub mod auto_fix;
pub mod auto_rollback;
pub mod checks;
pub mod consistency_validator;
pub mod periodic_validation;
pub mod rollback_executor;
pub mod safety_gate;
pub mod validation_report;

pub use auto_fix::AutoFixEngine;
pub use auto_rollback::{AutoRollbackEngine, RollbackCriterion};
pub use checks::{CheckContext, ConsistencyCheck};
pub use consistency_validator::ConsistencyValidator;
pub use periodic_validation::{AlertSink, PeriodicValidationScheduler};
pub use rollback_executor::{
    PlanState, RollbackExecutionRecord, RollbackExecutor, RollbackPlan, RollbackStep, StepAction,
    ValidationCheck,
};
pub use safety_gate::{SafetyCheck, SafetyGate};
pub use validation_report::ValidationReport;
