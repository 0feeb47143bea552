use crate::config::types::UserException;
use crate::store::CompiledUnit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Launch profile consumed by the agent launcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchProfile {
    pub java: PathBuf,
    /// Raw virtual-machine options, forwarded untouched
    pub vm_options: Vec<String>,
    pub classpath: Vec<PathBuf>,
    /// Main class of the agent; receives the control port as its only argument
    pub agent_main: String,
    pub connect_timeout_ms: u64,
}

impl LaunchProfile {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Host -> agent control request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Load { units: Vec<CompiledUnit> },
    Redefine { units: Vec<CompiledUnit> },
    Invoke { class_name: String, method: String },
    VarValue { class_name: String, variable: String },
    AddToClasspath { path: String },
    Close,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::Load { .. } => "load",
            ControlRequest::Redefine { .. } => "redefine",
            ControlRequest::Invoke { .. } => "invoke",
            ControlRequest::VarValue { .. } => "var_value",
            ControlRequest::AddToClasspath { .. } => "add_to_classpath",
            ControlRequest::Close => "close",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Agent -> host control response. `Output` frames may precede the final
/// response of an `invoke` or `var_value`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Loaded { units: Vec<String> },
    InstallFailed { unit: String, message: String },
    Value { value: String },
    Output { stream: OutputStream, text: String },
    UserException {
        exception_class: String,
        message: Option<String>,
    },
    Stopped,
    /// Acknowledges `add_to_classpath` and `close`
    Done,
    Failure { message: String },
}

impl ControlResponse {
    pub fn user_exception(&self) -> Option<UserException> {
        match self {
            ControlResponse::UserException {
                exception_class,
                message,
            } => Some(UserException {
                exception_class: exception_class.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// Receives user-code output of one request. Passed explicitly with every
/// `invoke`/`var_value`.
pub trait OutputSink: Send + Sync {
    fn write(&self, stream: OutputStream, text: &str);
}

/// Sink that drops everything
pub struct DiscardOutput;

impl OutputSink for DiscardOutput {
    fn write(&self, _stream: OutputStream, _text: &str) {}
}

/// Sink accumulating both streams in memory
#[derive(Debug, Default)]
pub struct CollectedOutput {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl CollectedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> String {
        match self.stdout.lock() {
            Ok(text) => text.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn stderr(&self) -> String {
        match self.stderr.lock() {
            Ok(text) => text.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OutputSink for CollectedOutput {
    fn write(&self, stream: OutputStream, text: &str) {
        let target = match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        };
        match target.lock() {
            Ok(mut buffer) => buffer.push_str(text),
            Err(poisoned) => poisoned.into_inner().push_str(text),
        }
    }
}
