// Config validation
// Strict mode fails fast at startup; otherwise problems are reported and the
// caller decides.

use crate::config::config::SandboxConfig;
use crate::config::types::{Result, SandboxError};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_timeouts(config, &mut result);
    validate_sandbox(config, &mut result);
    validate_launch(config, &mut result);

    if config.strict_mode && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(SandboxError::Config(error_msg));
    }

    Ok(result)
}

fn validate_timeouts(config: &SandboxConfig, result: &mut ValidationResult) {
    let timeouts = &config.timeouts;
    if timeouts.connect_ms == 0 {
        result.add_error("timeouts.connect_ms cannot be zero".to_string());
    }
    if timeouts.execution_ms == 0 {
        result.add_error("timeouts.execution_ms cannot be zero".to_string());
    }
    if timeouts.kill_grace_ms == 0 {
        result.add_warning(
            "timeouts.kill_grace_ms is zero, children get SIGKILL without a grace period"
                .to_string(),
        );
    }
    if timeouts.execution_ms != 0 && timeouts.execution_ms < 100 {
        result.add_warning(format!(
            "timeouts.execution_ms {} is very low, most snippets will be stopped",
            timeouts.execution_ms
        ));
    }
}

fn validate_sandbox(config: &SandboxConfig, result: &mut ValidationResult) {
    if !config.sandbox.enabled {
        result.add_warning(
            "sandbox.enabled is false, compiled code is installed without validation".to_string(),
        );
        return;
    }

    match config.policy_rules() {
        Ok(rules) if rules.is_empty() => result.add_error(
            "sandbox is enabled but the policy is empty, every access would be denied"
                .to_string(),
        ),
        Ok(_) => {
            if let Err(e) = config.policy_graph() {
                result.add_error(format!("invalid policy: {}", e));
            }
        }
        Err(e) => result.add_error(e.to_string()),
    }
}

fn validate_launch(config: &SandboxConfig, result: &mut ValidationResult) {
    let launch = &config.launch;
    if launch.java.as_os_str().is_empty() {
        result.add_error("launch.java cannot be empty".to_string());
    }
    if launch.agent_main.trim().is_empty() {
        result.add_error("launch.agent_main cannot be empty".to_string());
    }
    if launch.agent_layout.entry_points.is_empty() {
        result.add_error(
            "launch.agent_layout.entry_points is empty, user code could never be interrupted"
                .to_string(),
        );
    }
    for option in &launch.vm_options {
        if option.starts_with("-agentlib:jdwp") || option.starts_with("-Xrunjdwp") {
            result.add_error(format!(
                "launch.vm_options must not configure the debug agent: {}",
                option
            ));
        }
    }
    for entry in &launch.classpath {
        if !entry.exists() {
            result.add_warning(format!("classpath entry does not exist: {:?}", entry));
        }
    }
}
