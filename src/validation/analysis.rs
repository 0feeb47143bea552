/// Violation collection for one validation pass
use crate::access::signature::MethodSignature;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Category tag of every violation diagnostic
pub const VIOLATION_KIND: &str = "sandbox";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    ForbiddenMethod(MethodSignature),
    ForbiddenField { owner: String, field: String },
}

impl Violation {
    /// Human-readable diagnostic shown to the snippet author
    pub fn message(&self) -> String {
        match self {
            Violation::ForbiddenMethod(method) if method.is_constructor() => {
                format!("The class {} is not allowed", method.class_name)
            }
            Violation::ForbiddenMethod(method) => format!(
                "The method {} in {} is not allowed",
                method.method_name, method.class_name
            ),
            Violation::ForbiddenField { owner, field } => {
                format!("The field {} in {} is not allowed", field, owner)
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::ForbiddenMethod(method) => write!(f, "forbidden method {method}"),
            Violation::ForbiddenField { owner, field } => {
                write!(f, "forbidden field {owner}.{field}")
            }
        }
    }
}

/// Distinct violations of a failed pass, in a stable order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} sandbox violation(s): {}", .violations.len(), join(.violations))]
pub struct FailedAnalysis {
    pub violations: BTreeSet<Violation>,
    /// Units whose code produced each violation
    pub origins: BTreeMap<Violation, BTreeSet<String>>,
}

/// Group reported violations by value, keeping every producing unit
pub fn collect_origins<'a, I>(reported: I) -> BTreeMap<Violation, BTreeSet<String>>
where
    I: IntoIterator<Item = &'a (String, Violation)>,
{
    let mut origins: BTreeMap<Violation, BTreeSet<String>> = BTreeMap::new();
    for (unit, violation) in reported {
        origins
            .entry(violation.clone())
            .or_default()
            .insert(unit.clone());
    }
    origins
}

fn join(violations: &BTreeSet<Violation>) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rules report into this from any thread; nothing fails until
/// [`Analysis::report_violations`].
#[derive(Debug, Default)]
pub struct Analysis {
    violations: Mutex<Vec<(String, Violation)>>,
}

impl Analysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation produced by the code of `unit` (dotted class name)
    pub fn report(&self, unit: &str, violation: Violation) {
        log::debug!("Violation reported in {}: {}", unit, violation);
        let entry = (unit.to_string(), violation);
        match self.violations.lock() {
            Ok(mut violations) => violations.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    pub fn len(&self) -> usize {
        match self.violations.lock() {
            Ok(violations) => violations.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn report_violations(&self) -> Result<(), FailedAnalysis> {
        let origins = match self.violations.lock() {
            Ok(violations) => collect_origins(violations.iter()),
            Err(poisoned) => collect_origins(poisoned.into_inner().iter()),
        };
        if origins.is_empty() {
            Ok(())
        } else {
            Err(FailedAnalysis {
                violations: origins.keys().cloned().collect(),
                origins,
            })
        }
    }
}
