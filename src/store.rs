/// Loaded-code store: the gate every batch of compiled units passes before
/// it reaches the child runtime
///
/// A batch is validated as a whole. If any unit violates the policy, none of
/// the batch is installed.
use crate::access::graph::PermissionGraph;
use crate::config::types::{Result, SandboxError};
use crate::observability::audit;
use crate::validation::analysis::{Analysis, Violation};
use crate::validation::check::BytecodeCheck;
use crate::validation::member_filter::ForbiddenMemberFilter;
use crate::validation::rule::Rule;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// One named blob of compiled instructions (a JVM class file)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl CompiledUnit {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// SHA256 of the unit's bytes
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub unit: String,
    pub installed: bool,
}

/// A batch refused by validation. `outcomes` lists every unit of the batch,
/// none of them installed.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{} violation(s), {} unit(s) not installed", .violations.len(), .outcomes.len())]
pub struct InstallRejected {
    pub violations: BTreeSet<Violation>,
    /// Units whose code produced each violation
    pub origins: BTreeMap<Violation, BTreeSet<String>>,
    pub outcomes: Vec<LoadOutcome>,
}

pub trait CodeStore: Send + Sync {
    /// Install new units
    fn load(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>>;

    /// Replace already installed units
    fn redefine(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>>;

    fn is_installed(&self, name: &str) -> bool;

    /// Roll back units the child runtime refused after the store accepted them
    fn evict(&self, names: &[String]);

    /// Empty store with the same validation, for another child runtime
    fn fresh(&self) -> Arc<dyn CodeStore>;
}

/// Installed units by name, with their digests
#[derive(Debug, Default)]
struct Installed {
    units: Mutex<BTreeMap<String, String>>,
}

impl Installed {
    fn record(&self, units: &[CompiledUnit]) -> Vec<LoadOutcome> {
        let mut installed = match self.units.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        units
            .iter()
            .map(|unit| {
                installed.insert(unit.name.clone(), unit.digest());
                LoadOutcome {
                    unit: unit.name.clone(),
                    installed: true,
                }
            })
            .collect()
    }

    fn contains(&self, name: &str) -> bool {
        match self.units.lock() {
            Ok(guard) => guard.contains_key(name),
            Err(poisoned) => poisoned.into_inner().contains_key(name),
        }
    }

    fn remove(&self, names: &[String]) {
        let mut installed = match self.units.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for name in names {
            installed.remove(name);
        }
    }
}

/// Validating store: runs every rule over the whole batch first
pub struct SandboxCodeStore {
    check: BytecodeCheck,
    installed: Installed,
}

impl SandboxCodeStore {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self {
            check: BytecodeCheck::with_rules(rules),
            installed: Installed::default(),
        }
    }

    /// Store checking against a single permission graph
    pub fn for_graph(graph: Arc<PermissionGraph>) -> Self {
        Self::new(vec![Arc::new(ForbiddenMemberFilter::new(graph)) as Arc<dyn Rule>])
    }

    fn admit(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        let analysis = Analysis::new();
        for unit in units {
            self.check.run(&analysis, &unit.bytes)?;
        }
        if let Err(failed) = analysis.report_violations() {
            log::warn!(
                "Rejected batch of {} units: {}",
                units.len(),
                failed
            );
            return Err(SandboxError::InstallRejected(InstallRejected {
                violations: failed.violations,
                origins: failed.origins,
                outcomes: units
                    .iter()
                    .map(|unit| LoadOutcome {
                        unit: unit.name.clone(),
                        installed: false,
                    })
                    .collect(),
            }));
        }
        Ok(self.installed.record(units))
    }
}

impl CodeStore for SandboxCodeStore {
    fn load(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        self.admit(units)
    }

    fn redefine(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        self.admit(units)
    }

    fn is_installed(&self, name: &str) -> bool {
        self.installed.contains(name)
    }

    fn evict(&self, names: &[String]) {
        self.installed.remove(names);
    }

    fn fresh(&self) -> Arc<dyn CodeStore> {
        Arc::new(Self {
            check: self.check.clone(),
            installed: Installed::default(),
        })
    }
}

/// Store that installs everything unchecked. Only built when the sandbox is
/// switched off in configuration.
pub struct UncheckedCodeStore {
    installed: Installed,
}

impl UncheckedCodeStore {
    pub(crate) fn new() -> Self {
        log::warn!("Sandbox disabled: compiled units are installed without validation");
        audit::sandbox_disabled();
        Self {
            installed: Installed::default(),
        }
    }
}

impl CodeStore for UncheckedCodeStore {
    fn load(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        Ok(self.installed.record(units))
    }

    fn redefine(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        Ok(self.installed.record(units))
    }

    fn is_installed(&self, name: &str) -> bool {
        self.installed.contains(name)
    }

    fn evict(&self, names: &[String]) {
        self.installed.remove(names);
    }

    fn fresh(&self) -> Arc<dyn CodeStore> {
        Arc::new(Self {
            installed: Installed::default(),
        })
    }
}

/// Store matching the `sandbox_enabled` switch
pub fn code_store(sandbox_enabled: bool, graph: Arc<PermissionGraph>) -> Arc<dyn CodeStore> {
    if sandbox_enabled {
        Arc::new(SandboxCodeStore::for_graph(graph))
    } else {
        Arc::new(UncheckedCodeStore::new())
    }
}
