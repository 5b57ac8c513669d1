//! Health checks over Cardbox conflict state.
//!
//! A registry of independent rules runs against conflict records and
//! system-level counters, producing per-conflict health scores, a flat
//! issue list and an overall report with recommendations. The engine is
//! strictly read-only over conflict state; acting on findings is left to
//! the caller.

mod engine;
mod report;
pub mod rules;

pub use engine::{DiagnosticsConfig, DiagnosticsEngine, SystemStats};
pub use report::{
    ConflictHealth, DiagnosticIssue, DiagnosticResult, HealthReport, IssueSeverity, RiskLevel,
};
