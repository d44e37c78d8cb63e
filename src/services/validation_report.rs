//! Validation report builder.
//!
//! A pure projection of a [`ConsistencyResult`]: grouping by severity and by
//! owning check, structured for machines and renderable for humans. It never
//! mutates the result it summarizes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CheckDescriptor, ConsistencyResult, Criticality, IssueSeverity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReportEntry {
    pub name: String,
    pub criticality: Criticality,
    pub has_auto_fix: bool,
    pub issue_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_id: Uuid,
    pub passed: bool,
    pub total_issues: usize,
    pub issues_by_severity: HashMap<IssueSeverity, usize>,
    pub checks: Vec<CheckReportEntry>,
    /// Issues whose type no registered check claims (synthetic faults land
    /// here unless a check owns the `validation_error` type).
    pub unattributed_issues: usize,
    pub duration_ms: u64,
}

impl ValidationReport {
    pub fn build(result: &ConsistencyResult, checks: &[CheckDescriptor]) -> Self {
        let mut issues_by_severity: HashMap<IssueSeverity, usize> = HashMap::new();
        for issue in result.issues() {
            *issues_by_severity.entry(issue.severity).or_insert(0) += 1;
        }

        let mut attributed = 0usize;
        let check_entries: Vec<CheckReportEntry> = checks
            .iter()
            .map(|descriptor| {
                let issue_count = result
                    .issues()
                    .iter()
                    .filter(|issue| descriptor.issue_types.contains(&issue.issue_type))
                    .count();
                attributed += issue_count;
                CheckReportEntry {
                    name: descriptor.name.clone(),
                    criticality: descriptor.criticality,
                    has_auto_fix: descriptor.has_auto_fix,
                    issue_count,
                }
            })
            .collect();

        Self {
            run_id: result.run_id,
            passed: result.passed(),
            total_issues: result.issues().len(),
            issues_by_severity,
            checks: check_entries,
            unattributed_issues: result.issues().len().saturating_sub(attributed),
            duration_ms: result.duration_ms,
        }
    }

    /// Human-readable rendering. The structured struct stays the machine
    /// interface; this is only a view.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Validation run {} — {}\n",
            self.run_id,
            if self.passed { "PASSED" } else { "FAILED" }
        ));
        out.push_str(&format!(
            "  {} issue(s) in {} ms\n",
            self.total_issues, self.duration_ms
        ));
        for severity in [
            IssueSeverity::Critical,
            IssueSeverity::Error,
            IssueSeverity::Warning,
        ] {
            if let Some(count) = self.issues_by_severity.get(&severity) {
                out.push_str(&format!("  {severity:?}: {count}\n"));
            }
        }
        for entry in &self.checks {
            out.push_str(&format!(
                "  [{}] {} issue(s){}\n",
                entry.name,
                entry.issue_count,
                if entry.has_auto_fix { " (auto-fix available)" } else { "" }
            ));
        }
        if self.unattributed_issues > 0 {
            out.push_str(&format!(
                "  {} issue(s) not attributable to a registered check\n",
                self.unattributed_issues
            ));
        }
        out
    }
}
