/// Configuration loading from a JSON file
use crate::access::builder::PermissionGraphBuilder;
use crate::access::graph::PermissionGraph;
use crate::access::policy::{number_rules, read_policy_file, PolicyRule};
use crate::config::types::{Result, SandboxError};
use crate::core::controller::ControllerSettings;
use crate::core::types::LaunchProfile;
use crate::interrupt::AgentLayout;
use crate::store::{code_store, CodeStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_KILL_GRACE_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub enabled: bool,
    /// Inline policy rules, applied before the policy file
    pub policy: Vec<String>,
    pub policy_file: Option<PathBuf>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: Vec::new(),
            policy_file: None,
        }
    }
}

/// Policy rules by source. Inline rules apply before the file's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRules {
    pub inline: Vec<(usize, PolicyRule)>,
    pub file: Option<(PathBuf, Vec<(usize, PolicyRule)>)>,
}

impl PolicyRules {
    pub fn len(&self) -> usize {
        self.inline.len() + self.file.as_ref().map_or(0, |(_, rules)| rules.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSection {
    pub java: PathBuf,
    pub vm_options: Vec<String>,
    pub classpath: Vec<PathBuf>,
    pub agent_main: String,
    pub agent_layout: AgentLayout,
}

impl Default for LaunchSection {
    fn default() -> Self {
        let agent_layout = AgentLayout::default();
        Self {
            java: PathBuf::from("java"),
            vm_options: Vec::new(),
            classpath: Vec::new(),
            agent_main: agent_layout.agent_type.clone(),
            agent_layout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub connect_ms: u64,
    pub execution_ms: u64,
    pub kill_grace_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            connect_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            execution_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

/// Full config file structure; every field has a default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub sandbox: SandboxSection,
    pub launch: LaunchSection,
    pub timeouts: TimeoutSection,
    /// Validation errors abort startup instead of being logged
    pub strict_mode: bool,
}

impl SandboxConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| SandboxError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SandboxConfig = serde_json::from_str(&config_content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Inline rules and the policy file's rules, each numbered by its
    /// position in its own source
    pub fn policy_rules(&self) -> Result<PolicyRules> {
        let inline = number_rules(&self.sandbox.policy);
        let file = match &self.sandbox.policy_file {
            Some(path) => {
                let rules = read_policy_file(path).map_err(|e| {
                    SandboxError::Config(format!(
                        "Failed to read policy file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Some((path.clone(), rules))
            }
            None => None,
        };
        Ok(PolicyRules { inline, file })
    }

    pub fn policy_graph(&self) -> Result<Arc<PermissionGraph>> {
        let rules = self.policy_rules()?;
        if rules.is_empty() {
            return Ok(Arc::new(PermissionGraph::empty()));
        }
        let mut builder = PermissionGraphBuilder::new();
        builder.apply(rules.inline)?;
        if let Some((path, file_rules)) = rules.file {
            builder
                .apply(file_rules)
                .map_err(|err| err.in_file(&path))?;
        }
        Ok(Arc::new(builder.build()))
    }

    pub fn code_store(&self) -> Result<Arc<dyn CodeStore>> {
        Ok(code_store(self.sandbox.enabled, self.policy_graph()?))
    }

    pub fn launch_profile(&self) -> LaunchProfile {
        LaunchProfile {
            java: self.launch.java.clone(),
            vm_options: self.launch.vm_options.clone(),
            classpath: self.launch.classpath.clone(),
            agent_main: self.launch.agent_main.clone(),
            connect_timeout_ms: self.timeouts.connect_ms,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            layout: self.launch.agent_layout.clone(),
            connect_timeout: Duration::from_millis(self.timeouts.connect_ms),
            kill_grace: Duration::from_millis(self.timeouts.kill_grace_ms),
        }
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.execution_ms)
    }
}
