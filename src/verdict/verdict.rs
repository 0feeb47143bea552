/// Outcome classification
/// Maps the error an evaluation step ended with to a status and the
/// diagnostics shown to the snippet author. Pure function, no I/O.
use crate::config::types::{EvaluationStatus, SandboxError};
use crate::store::InstallRejected;
use crate::validation::analysis::VIOLATION_KIND;
use serde::{Deserialize, Serialize};

pub const KIND_STOPPED: &str = "stopped";
pub const KIND_RUNTIME: &str = "runtime";
pub const KIND_INTERNAL: &str = "internal";

/// One diagnostic attached to an evaluated component
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationError {
    pub kind: String,
    pub message: String,
    pub component_id: String,
    /// Compiled unit whose code caused the error, for sandbox violations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl EvaluationError {
    pub fn new(kind: &str, message: impl Into<String>, component_id: &str) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            component_id: component_id.to_string(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// One record per violation and producing unit
fn violation_errors(rejected: &InstallRejected, component_id: &str) -> Vec<EvaluationError> {
    let mut errors = Vec::new();
    for violation in &rejected.violations {
        let error = EvaluationError::new(VIOLATION_KIND, violation.message(), component_id);
        match rejected.origins.get(violation) {
            Some(units) if !units.is_empty() => {
                errors.extend(units.iter().map(|unit| error.clone().with_unit(unit.clone())))
            }
            _ => errors.push(error),
        }
    }
    errors
}

pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn classify(
        error: &SandboxError,
        component_id: &str,
    ) -> (EvaluationStatus, Vec<EvaluationError>) {
        match error {
            SandboxError::InstallRejected(rejected) => (
                EvaluationStatus::Rejected,
                violation_errors(rejected, component_id),
            ),
            SandboxError::Preempted(cause) => (
                EvaluationStatus::Stopped,
                vec![EvaluationError::new(
                    KIND_STOPPED,
                    format!("Evaluation stopped: {}", cause),
                    component_id,
                )],
            ),
            SandboxError::UserException(exception) => (
                EvaluationStatus::Failed,
                vec![EvaluationError::new(
                    KIND_RUNTIME,
                    exception.to_string(),
                    component_id,
                )],
            ),
            other => (
                EvaluationStatus::InternalError,
                vec![EvaluationError::new(
                    KIND_INTERNAL,
                    other.to_string(),
                    component_id,
                )],
            ),
        }
    }
}

/// Free-function form of [`VerdictClassifier::classify`]
pub fn classify(error: &SandboxError, component_id: &str) -> (EvaluationStatus, Vec<EvaluationError>) {
    VerdictClassifier::classify(error, component_id)
}
