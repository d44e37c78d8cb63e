// src/config.rs

use serde::Deserialize;

/// Runtime configuration for the reconciliation engine.
///
/// All thresholds used by the auto-rollback decision engine live here rather
/// than in code: the calibration is an operational tuning decision.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerConfig {
    // Remote provider access
    #[serde(default = "default_max_concurrent_remote_calls")]
    pub max_concurrent_remote_calls: usize,
    #[serde(default = "default_remote_retry_limit")]
    pub remote_retry_limit: u32,
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    // Validation behavior
    #[serde(default = "default_enable_auto_fix")]
    pub enable_auto_fix: bool,
    #[serde(default = "default_max_issues_reported")]
    pub max_issues_reported: usize,
    #[serde(default = "default_validation_interval_hours")]
    pub validation_interval_hours: u64,

    // Auto-rollback calibration
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    #[serde(default = "default_error_rate_weight")]
    pub error_rate_weight: f64,
    #[serde(default = "default_latency_multiplier_threshold")]
    pub latency_multiplier_threshold: f64,
    #[serde(default = "default_latency_weight")]
    pub latency_weight: f64,
    #[serde(default = "default_db_connection_failure_threshold")]
    pub db_connection_failure_threshold: f64,
    #[serde(default = "default_db_connection_failure_weight")]
    pub db_connection_failure_weight: f64,
    #[serde(default = "default_payment_failure_rate_threshold")]
    pub payment_failure_rate_threshold: f64,
    #[serde(default = "default_payment_failure_rate_weight")]
    pub payment_failure_rate_weight: f64,
    #[serde(default = "default_rollback_score_threshold")]
    pub rollback_score_threshold: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_remote_calls: default_max_concurrent_remote_calls(),
            remote_retry_limit: default_remote_retry_limit(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            enable_auto_fix: default_enable_auto_fix(),
            max_issues_reported: default_max_issues_reported(),
            validation_interval_hours: default_validation_interval_hours(),
            error_rate_threshold: default_error_rate_threshold(),
            error_rate_weight: default_error_rate_weight(),
            latency_multiplier_threshold: default_latency_multiplier_threshold(),
            latency_weight: default_latency_weight(),
            db_connection_failure_threshold: default_db_connection_failure_threshold(),
            db_connection_failure_weight: default_db_connection_failure_weight(),
            payment_failure_rate_threshold: default_payment_failure_rate_threshold(),
            payment_failure_rate_weight: default_payment_failure_rate_weight(),
            rollback_score_threshold: default_rollback_score_threshold(),
        }
    }
}

fn default_max_concurrent_remote_calls() -> usize {
    8
}

fn default_remote_retry_limit() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    250
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_enable_auto_fix() -> bool {
    true
}

fn default_max_issues_reported() -> usize {
    100
}

fn default_validation_interval_hours() -> u64 {
    6
}

fn default_error_rate_threshold() -> f64 {
    0.05
}

fn default_error_rate_weight() -> f64 {
    0.30
}

fn default_latency_multiplier_threshold() -> f64 {
    2.0
}

fn default_latency_weight() -> f64 {
    0.25
}

fn default_db_connection_failure_threshold() -> f64 {
    10.0
}

fn default_db_connection_failure_weight() -> f64 {
    0.20
}

fn default_payment_failure_rate_threshold() -> f64 {
    0.02
}

fn default_payment_failure_rate_weight() -> f64 {
    0.25
}

fn default_rollback_score_threshold() -> f64 {
    0.5
}
