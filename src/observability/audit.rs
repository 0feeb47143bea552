/// Security audit events for snipbox
/// Structured JSON records of sandbox decisions and child lifecycle, emitted
/// through the `log` facade under the `security` target so operators can
/// route them separately from diagnostics.
use crate::interrupt::InterruptOutcome;
use crate::kernel::signal::KillReport;
use crate::validation::analysis::Violation;
use chrono::{DateTime, Utc};
use log::Level;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "security";

/// Security event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    // Lifecycle
    EvaluationStart,
    EvaluationEnd,
    ChildExit,

    // Sandbox decisions
    SandboxViolation,
    SandboxDisabled,

    // Preemption
    ForcedInterrupt,
    InterruptFailure,
    TimeoutPreemption,

    // Cleanup
    CleanupSuccess,
    CleanupFailure,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::EvaluationStart | SecurityEventType::EvaluationEnd => {
                SecuritySeverity::Low
            }
            SecurityEventType::ChildExit => SecuritySeverity::Medium,
            SecurityEventType::SandboxViolation => SecuritySeverity::High,
            SecurityEventType::SandboxDisabled => SecuritySeverity::High,
            SecurityEventType::ForcedInterrupt => SecuritySeverity::Medium,
            SecurityEventType::InterruptFailure => SecuritySeverity::High,
            SecurityEventType::TimeoutPreemption => SecuritySeverity::Medium,
            SecurityEventType::CleanupSuccess => SecuritySeverity::Low,
            SecurityEventType::CleanupFailure => SecuritySeverity::Critical,
        }
    }

    fn level(&self) -> Level {
        match self.default_severity() {
            SecuritySeverity::Critical | SecuritySeverity::High => Level::Error,
            SecuritySeverity::Medium => Level::Warn,
            SecuritySeverity::Low => Level::Info,
        }
    }
}

/// Identifiers tying events of one evaluation together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub evaluation_id: Option<String>,
    pub controller_id: Option<String>,
    pub component_id: Option<String>,
    /// Process group leader of the child runtime
    pub child_pid: Option<u32>,
}

impl CorrelationIds {
    pub fn for_evaluation(evaluation_id: Uuid) -> Self {
        Self {
            evaluation_id: Some(evaluation_id.to_string()),
            ..Self::default()
        }
    }

    pub fn for_controller(controller_id: Uuid) -> Self {
        Self {
            controller_id: Some(controller_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_controller(mut self, controller_id: Uuid) -> Self {
        self.controller_id = Some(controller_id.to_string());
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    pub fn with_child_pid(mut self, pid: u32) -> Self {
        self.child_pid = Some(pid);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: String,
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: CorrelationIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_report: Option<KillReport>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            correlation: CorrelationIds::default(),
            violation: None,
            interrupt: None,
            kill_report: None,
        }
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_severity(mut self, severity: SecuritySeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_violation(mut self, violation: Violation) -> Self {
        self.violation = Some(violation);
        self
    }

    pub fn with_interrupt(mut self, outcome: InterruptOutcome) -> Self {
        self.interrupt = Some(outcome);
        self
    }

    pub fn with_kill_report(mut self, report: KillReport) -> Self {
        self.kill_report = Some(report);
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "event_type": self.event_type,
                "details": self.details,
                "encode_error": e.to_string(),
            })
        })
    }
}

/// Emit an event under the audit target
pub fn log_security_event(event: SecurityEvent) {
    log::log!(target: AUDIT_TARGET, event.event_type.level(), "{}", event.to_json());
}

pub fn evaluation_start(correlation: CorrelationIds, components: usize) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::EvaluationStart,
            format!("Evaluation started with {} component(s)", components),
        )
        .with_correlation(correlation),
    );
}

pub fn evaluation_end(correlation: CorrelationIds, status: &str) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::EvaluationEnd,
            format!("Evaluation ended: status={}", status),
        )
        .with_correlation(correlation),
    );
}

pub fn sandbox_violation(correlation: CorrelationIds, violation: &Violation) {
    log_security_event(
        SecurityEvent::new(SecurityEventType::SandboxViolation, violation.message())
            .with_correlation(correlation)
            .with_violation(violation.clone()),
    );
}

pub fn sandbox_disabled() {
    log_security_event(SecurityEvent::new(
        SecurityEventType::SandboxDisabled,
        "Code store created without bytecode validation",
    ));
}

pub fn forced_interrupt(correlation: CorrelationIds, outcome: &InterruptOutcome) {
    let details = match outcome {
        InterruptOutcome::Stopped { thread } => format!("Stop injected into {}", thread),
        InterruptOutcome::NotInUserCode { thread } => {
            format!("Agent on {} was not running user code", thread)
        }
        InterruptOutcome::NoAgentFrame => "No agent frame to interrupt".to_string(),
    };
    log_security_event(
        SecurityEvent::new(SecurityEventType::ForcedInterrupt, details)
            .with_correlation(correlation)
            .with_interrupt(outcome.clone()),
    );
}

pub fn interrupt_failure(correlation: CorrelationIds, reason: &str) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::InterruptFailure,
            format!("Forceful interrupt failed: {}", reason),
        )
        .with_correlation(correlation),
    );
}

pub fn timeout_preemption(correlation: CorrelationIds, timeout: Duration) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::TimeoutPreemption,
            format!("Execution exceeded {} ms", timeout.as_millis()),
        )
        .with_correlation(correlation),
    );
}

pub fn child_exit(correlation: CorrelationIds, exit_code: Option<i32>) {
    let details = match exit_code {
        Some(code) => format!("Child runtime exited on its own with code {}", code),
        None => "Child runtime was terminated by a signal".to_string(),
    };
    log_security_event(
        SecurityEvent::new(SecurityEventType::ChildExit, details).with_correlation(correlation),
    );
}

/// Cleanup outcome; a group that survived SIGKILL is a failure
pub fn cleanup(correlation: CorrelationIds, report: &KillReport) {
    let (event_type, details) = if report.reaped {
        (
            SecurityEventType::CleanupSuccess,
            format!(
                "Child released after {} ms (term={}, kill={})",
                report.waited_ms, report.term_sent, report.kill_sent
            ),
        )
    } else {
        (
            SecurityEventType::CleanupFailure,
            format!("Child not reaped: {}", report.notes.join("; ")),
        )
    };
    log_security_event(
        SecurityEvent::new(event_type, details)
            .with_correlation(correlation)
            .with_kill_report(report.clone()),
    );
}
