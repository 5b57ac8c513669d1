//! The diagnostics engine: runs the rule registry over conflict state.
//!
//! Purely observational; nothing here mutates a conflict. Callers hand
//! in a snapshot of conflict records plus system counters and get back
//! scores, issues and recommendations.

use crate::report::{ConflictHealth, DiagnosticIssue, DiagnosticResult, HealthReport, IssueSeverity, RiskLevel};
use crate::rules::{built_in_rules, DiagnosticRule, RuleFn};
use cardbox_types::{ConflictState, ConflictStatus};
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

/// Thresholds for the built-in rules and alert dispatch.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Age at which an active conflict draws a warning.
    pub stale_warning: Duration,
    /// Age at which an active conflict becomes critical.
    pub stale_critical: Duration,
    /// How long a conflict may sit in `resolving` before a warning.
    pub resolution_timeout: Duration,
    /// Minimum severity that should page someone.
    pub alert_threshold: IssueSeverity,
    /// Resolution failure rate (failed / terminal) that draws an error.
    pub failure_rate_threshold: f64,
    /// Persistence failure rate (failures / attempts) that draws a warning.
    pub persistence_failure_threshold: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            stale_warning: Duration::from_secs(5 * 60),
            stale_critical: Duration::from_secs(10 * 60),
            resolution_timeout: Duration::from_secs(2 * 60),
            alert_threshold: IssueSeverity::Error,
            failure_rate_threshold: 0.5,
            persistence_failure_threshold: 0.1,
        }
    }
}

/// Durable-write counters sampled from the conflict lifecycle manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStats {
    pub persist_attempts: u64,
    pub persist_failures: u64,
}

/// Runs rules over conflicts and aggregates health.
pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
    rules: Vec<DiagnosticRule>,
}

impl DiagnosticsEngine {
    #[must_use]
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self {
            config,
            rules: built_in_rules(),
        }
    }

    /// Adds a rule to the registry alongside the built-ins.
    pub fn register_rule(&mut self, name: &'static str, run: RuleFn) {
        self.rules.push(DiagnosticRule { name, run });
    }

    /// Scores one conflict by running every rule against it.
    #[must_use]
    pub fn conflict_health(&self, conflict: &ConflictState) -> ConflictHealth {
        let now = Utc::now();
        let issues: Vec<DiagnosticIssue> = self
            .rules
            .iter()
            .flat_map(|rule| (rule.run)(conflict, &self.config, now))
            .collect();
        ConflictHealth::from_issues(conflict.id, issues)
    }

    /// Runs every rule over every conflict plus the system-level checks,
    /// yielding a flat issue list.
    #[must_use]
    pub fn run_full_diagnostic(
        &self,
        conflicts: &[ConflictState],
        stats: &SystemStats,
    ) -> Vec<DiagnosticResult> {
        let now = Utc::now();
        let mut results = Vec::new();

        for conflict in conflicts {
            for rule in &self.rules {
                for issue in (rule.run)(conflict, &self.config, now) {
                    debug!(rule = rule.name, conflict_id = %conflict.id, severity = %issue.severity, "diagnostic issue");
                    results.push(DiagnosticResult {
                        conflict_id: Some(conflict.id),
                        severity: issue.severity,
                        description: issue.description,
                        recommended_actions: vec![issue.recommended_action],
                    });
                }
            }
        }

        results.extend(self.system_checks(conflicts, stats));
        results
    }

    /// Aggregates per-conflict scores into one report with deduplicated
    /// recommendations.
    #[must_use]
    pub fn health_report(&self, conflicts: &[ConflictState], stats: &SystemStats) -> HealthReport {
        if conflicts.is_empty() && stats.persist_failures == 0 {
            return HealthReport {
                overall_health: 100,
                risk: RiskLevel::Low,
                recommendations: Vec::new(),
            };
        }

        let healths: Vec<ConflictHealth> = conflicts
            .iter()
            .map(|c| self.conflict_health(c))
            .collect();
        let overall_health = if healths.is_empty() {
            100
        } else {
            healths.iter().map(|h| h.score).sum::<u32>() / healths.len() as u32
        };

        let mut recommendations: Vec<String> = Vec::new();
        for health in &healths {
            for issue in &health.issues {
                if !recommendations.contains(&issue.recommended_action) {
                    recommendations.push(issue.recommended_action.clone());
                }
            }
        }
        for result in self.system_checks(conflicts, stats) {
            for action in result.recommended_actions {
                if !recommendations.contains(&action) {
                    recommendations.push(action);
                }
            }
        }

        HealthReport {
            overall_health,
            risk: RiskLevel::from_score(overall_health),
            recommendations,
        }
    }

    /// Whether an issue at this severity should page someone. Ordered
    /// comparison: anything at or above the threshold alerts.
    #[must_use]
    pub fn should_alert(&self, severity: IssueSeverity) -> bool {
        severity >= self.config.alert_threshold
    }

    /// Checks that look at the population of conflicts rather than any
    /// single record.
    fn system_checks(
        &self,
        conflicts: &[ConflictState],
        stats: &SystemStats,
    ) -> Vec<DiagnosticResult> {
        let mut results = Vec::new();

        let terminal: Vec<_> = conflicts.iter().filter(|c| !c.is_active()).collect();
        if !terminal.is_empty() {
            let failed = terminal
                .iter()
                .filter(|c| c.status == ConflictStatus::Failed)
                .count();
            let rate = failed as f64 / terminal.len() as f64;
            if rate > self.config.failure_rate_threshold {
                results.push(DiagnosticResult {
                    conflict_id: None,
                    severity: IssueSeverity::Error,
                    description: format!(
                        "{failed} of {} terminal conflicts failed resolution ({:.0}%)",
                        terminal.len(),
                        rate * 100.0
                    ),
                    recommended_actions: vec![
                        "inspect failed conflicts for a common entity type or strategy".to_string(),
                    ],
                });
            }
        }

        if stats.persist_attempts > 0 {
            let rate = stats.persist_failures as f64 / stats.persist_attempts as f64;
            if rate > self.config.persistence_failure_threshold {
                results.push(DiagnosticResult {
                    conflict_id: None,
                    severity: IssueSeverity::Warning,
                    description: format!(
                        "{} of {} conflict persistence writes failed ({:.0}%)",
                        stats.persist_failures,
                        stats.persist_attempts,
                        rate * 100.0
                    ),
                    recommended_actions: vec![
                        "check the conflict store; in-memory state may not survive a restart"
                            .to_string(),
                    ],
                });
            }
        }

        results
    }
}

impl Default for DiagnosticsEngine {
    fn default() -> Self {
        Self::new(DiagnosticsConfig::default())
    }
}
