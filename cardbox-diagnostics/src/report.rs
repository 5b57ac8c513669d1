//! Diagnostic output types: issues, per-conflict health, overall report.

use cardbox_types::ConflictId;
use serde::{Deserialize, Serialize};

/// How serious a diagnostic finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
            IssueSeverity::Critical => "critical",
        }
    }

    /// Penalty applied to a conflict's health score.
    pub(crate) fn penalty(&self) -> u32 {
        match self {
            IssueSeverity::Warning => 10,
            IssueSeverity::Error => 20,
            IssueSeverity::Critical => 30,
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding produced by a diagnostic rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticIssue {
    pub severity: IssueSeverity,
    pub description: String,
    /// Suggested next step for whoever reads the report.
    pub recommended_action: String,
}

impl DiagnosticIssue {
    pub fn new(
        severity: IssueSeverity,
        description: impl Into<String>,
        recommended_action: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            description: description.into(),
            recommended_action: recommended_action.into(),
        }
    }
}

/// One entry in a full diagnostic run. Conflict-scoped entries carry the
/// conflict id; system-level entries do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub conflict_id: Option<ConflictId>,
    pub severity: IssueSeverity,
    pub description: String,
    pub recommended_actions: Vec<String>,
}

/// Overall risk bucket derived from a health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Buckets a 0..=100 health score.
    #[must_use]
    pub fn from_score(score: u32) -> Self {
        if score < 30 {
            RiskLevel::Critical
        } else if score < 50 {
            RiskLevel::High
        } else if score < 70 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Health of a single conflict: score, risk bucket and the issues found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictHealth {
    pub conflict_id: ConflictId,
    /// 0..=100, starting at 100 with per-issue penalties.
    pub score: u32,
    pub risk: RiskLevel,
    pub issues: Vec<DiagnosticIssue>,
}

impl ConflictHealth {
    pub(crate) fn from_issues(conflict_id: ConflictId, issues: Vec<DiagnosticIssue>) -> Self {
        let penalty: u32 = issues.iter().map(|i| i.severity.penalty()).sum();
        let score = 100u32.saturating_sub(penalty);
        Self {
            conflict_id,
            score,
            risk: RiskLevel::from_score(score),
            issues,
        }
    }
}

/// Top-level summary handed to UI and logging layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Average conflict health score; 100 when no conflicts exist.
    pub overall_health: u32,
    pub risk: RiskLevel,
    pub recommendations: Vec<String>,
}
