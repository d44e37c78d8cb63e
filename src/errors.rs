// src/errors.rs
use thiserror::Error;

/// Crate-wide error type.
///
/// Rollback-path variants are deliberately distinct so callers can tell
/// "nothing happened" (`SafetyBlocked`) from "something partially happened"
/// (`StepFailed`, `PlanValidationFailed`, `Cancelled`). Check-level faults
/// are usually recovered into structured issues instead of surfacing here.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    // --- Store / provider errors ---
    #[error("Local store error: {0}")]
    StoreError(String),

    #[error("Remote record not found: {0}")]
    RemoteNotFound(String),

    #[error("Remote provider rate limited: {0}")]
    RemoteRateLimited(String),

    #[error("Remote provider error: {0}")]
    RemoteProviderError(String),

    // --- Validation errors ---
    #[error("Consistency check '{check}' failed to execute: {message}")]
    CheckExecutionError { check: String, message: String },

    #[error("Auto-fix for check '{check}' failed: {message}")]
    AutoFixError { check: String, message: String },

    // --- Rollback errors ---
    #[error("Rollback plan '{plan_id}' blocked by safety checks: {failed_checks:?}")]
    SafetyBlocked {
        plan_id: String,
        failed_checks: Vec<String>,
    },

    #[error(
        "Rollback step {step_order} of plan '{plan_id}' failed (compensated: {compensated}): {message}"
    )]
    StepFailed {
        plan_id: String,
        step_order: u32,
        compensated: bool,
        message: String,
    },

    #[error("Post-rollback validation failed for plan '{plan_id}': {failed_checks:?}")]
    PlanValidationFailed {
        plan_id: String,
        failed_checks: Vec<String>,
    },

    #[error("Snapshot error for plan '{plan_id}': {message}")]
    SnapshotError { plan_id: String, message: String },

    #[error("Unknown rollback plan: {0}")]
    UnknownPlan(String),

    #[error("Invalid rollback plan '{plan_id}': {message}")]
    InvalidPlan { plan_id: String, message: String },

    // --- General/Internal errors ---
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Serialization Error: {0}")]
    SerializationError(String),

    #[error("Internal Server Error: {0}")]
    InternalServerError(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl AppError {
    /// Whether this error means no mutation was applied.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            AppError::SafetyBlocked { .. } | AppError::UnknownPlan(_) | AppError::InvalidPlan { .. }
        )
    }
}
