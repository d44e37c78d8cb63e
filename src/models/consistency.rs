// src/models/consistency.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How much a check matters operationally. Declared once per check at
/// registration time; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

/// Severity of a single detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
    Critical,
}

/// A single detected divergence or invariant violation.
///
/// Identity is structural: two issues with the same `issue_type` and
/// `description` are the same issue for de-duplication after an auto-fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub issue_type: String,
    pub description: String,
    pub severity: IssueSeverity,
    /// Opaque identifiers of the affected records.
    pub affected_records: Vec<String>,
    pub suggested_fix: Option<String>,
    pub auto_fixable: bool,
}

impl ConsistencyIssue {
    /// Structural identity used for post-fix de-duplication.
    pub fn same_issue(&self, other: &ConsistencyIssue) -> bool {
        self.issue_type == other.issue_type && self.description == other.description
    }
}

/// Aggregate outcome of one full validation run.
///
/// `passed` is derived from `issues` at construction and the two can never
/// disagree; the type offers no way to set them independently. Serialize
/// only: accepting external data here would let the two fields drift apart.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyResult {
    pub run_id: Uuid,
    passed: bool,
    issues: Vec<ConsistencyIssue>,
    pub metrics: HashMap<String, f64>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ConsistencyResult {
    pub fn from_issues(
        run_id: Uuid,
        issues: Vec<ConsistencyIssue>,
        metrics: HashMap<String, f64>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            run_id,
            passed: issues.is_empty(),
            issues,
            metrics,
            started_at,
            duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn issues(&self) -> &[ConsistencyIssue] {
        &self.issues
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Critical)
    }
}

/// Static descriptor of a registered check, used by the report builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDescriptor {
    pub name: String,
    pub description: String,
    pub criticality: Criticality,
    pub has_auto_fix: bool,
    /// Issue types attributable to this check.
    pub issue_types: Vec<String>,
}
