/// Core types and error taxonomy for the snipbox system
use crate::access::policy::PolicyParseError;
use crate::bytecode::ClassFormatError;
use crate::store::InstallRejected;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why an evaluation was deliberately terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    /// Stop requested by the caller (user pressed stop, connection closed)
    Requested,
    /// Execution timeout fired before the evaluation completed
    Timeout,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Requested => write!(f, "stop requested"),
            StopCause::Timeout => write!(f, "execution timeout"),
        }
    }
}

/// Final status of one evaluated component
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    /// Code installed and ran to completion
    #[serde(rename = "OK")]
    Completed,
    /// Installation rejected by the sandbox
    #[serde(rename = "SV")]
    Rejected,
    /// User code threw
    #[serde(rename = "RE")]
    Failed,
    /// Deliberately terminated by stop or timeout
    #[serde(rename = "STOP")]
    Stopped,
    /// Infrastructure failure (child setup, channel, interrupt)
    #[serde(rename = "IE")]
    InternalError,
}

impl EvaluationStatus {
    /// Short wire code
    pub fn code(&self) -> &'static str {
        match self {
            EvaluationStatus::Completed => "OK",
            EvaluationStatus::Rejected => "SV",
            EvaluationStatus::Failed => "RE",
            EvaluationStatus::Stopped => "STOP",
            EvaluationStatus::InternalError => "IE",
        }
    }

    /// Severity order used when folding several component outcomes
    fn rank(&self) -> u8 {
        match self {
            EvaluationStatus::Completed => 0,
            EvaluationStatus::Failed => 1,
            EvaluationStatus::Rejected => 2,
            EvaluationStatus::Stopped => 3,
            EvaluationStatus::InternalError => 4,
        }
    }

    /// The more severe of two statuses
    pub fn worst(self, other: EvaluationStatus) -> EvaluationStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// An exception raised by user code inside the child runtime
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserException {
    pub exception_class: String,
    pub message: Option<String>,
}

impl fmt::Display for UserException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.exception_class, message),
            None => write!(f, "{}", self.exception_class),
        }
    }
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Policy error: {0}")]
    PolicyParse(#[from] PolicyParseError),

    #[error("Class format error: {0}")]
    ClassFormat(#[from] ClassFormatError),

    #[error("Install rejected: {0}")]
    InstallRejected(InstallRejected),

    #[error("Child setup failed: {0}")]
    ChildSetup(String),

    #[error("Control channel error: {0}")]
    Channel(String),

    #[error("Interrupt failed: {0}")]
    Interrupt(String),

    #[error("Remote runtime disconnected")]
    Disconnected,

    #[error("Debug protocol error: {0}")]
    Protocol(String),

    #[error("Execution engine terminated: {0}")]
    EngineTerminated(String),

    #[error("Evaluation preempted: {0}")]
    Preempted(StopCause),

    #[error("User code failed: {0}")]
    UserException(UserException),

    #[error("Remote failure: {0}")]
    Remote(String),
}

impl SandboxError {
    /// True for errors that indicate the remote end is simply gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            SandboxError::Disconnected => true,
            SandboxError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

impl From<InstallRejected> for SandboxError {
    fn from(rejected: InstallRejected) -> Self {
        SandboxError::InstallRejected(rejected)
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(SandboxError::Disconnected.is_disconnect());
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(SandboxError::Io(eof).is_disconnect());
        assert!(!SandboxError::Remote("boom".to_string()).is_disconnect());
        assert!(!SandboxError::Preempted(StopCause::Timeout).is_disconnect());
    }

    #[test]
    fn test_user_exception_display() {
        let with_message = UserException {
            exception_class: "java.lang.ArithmeticException".to_string(),
            message: Some("/ by zero".to_string()),
        };
        assert_eq!(
            with_message.to_string(),
            "java.lang.ArithmeticException: / by zero"
        );
        let bare = UserException {
            exception_class: "java.lang.IllegalStateException".to_string(),
            message: None,
        };
        assert_eq!(bare.to_string(), "java.lang.IllegalStateException");
    }
}
