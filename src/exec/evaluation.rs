/// Evaluation driver
///
/// One evaluation owns one controller. Components are installed and run in
/// order; every component yields a report instead of an error so the caller
/// always has something to show the snippet author.
use crate::config::types::{EvaluationStatus, Result, SandboxError, StopCause};
use crate::core::controller::RemoteController;
use crate::core::environment::ForkedExecutionEnvironment;
use crate::core::types::CollectedOutput;
use crate::observability::audit::{self, CorrelationIds};
use crate::store::CompiledUnit;
use crate::verdict::{classify, EvaluationError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub class_name: String,
    pub method: String,
}

/// One unit of work: compiled code plus what to run afterwards
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationComponent {
    pub id: String,
    pub units: Vec<CompiledUnit>,
    /// Replace already loaded units instead of adding new ones
    #[serde(default)]
    pub redefine: bool,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
}

impl EvaluationComponent {
    pub fn new(id: impl Into<String>, units: Vec<CompiledUnit>) -> Self {
        Self {
            id: id.into(),
            units,
            redefine: false,
            entry_point: None,
        }
    }

    pub fn with_entry_point(mut self, class_name: impl Into<String>, method: impl Into<String>) -> Self {
        self.entry_point = Some(EntryPoint {
            class_name: class_name.into(),
            method: method.into(),
        });
        self
    }

    pub fn redefining(mut self) -> Self {
        self.redefine = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub component_id: String,
    pub status: EvaluationStatus,
    pub results: Vec<String>,
    pub errors: Vec<EvaluationError>,
    pub stdout: String,
    pub stderr: String,
}

/// Stops an evaluation from another thread
#[derive(Clone)]
pub struct StopHandle {
    controller: Arc<RemoteController>,
}

impl StopHandle {
    /// Interrupt running user code and release the child
    pub fn stop(&self) {
        stop_and_close(&self.controller, StopCause::Requested);
    }
}

pub struct Evaluation {
    id: Uuid,
    controller: Arc<RemoteController>,
}

impl Evaluation {
    pub fn start(environment: &ForkedExecutionEnvironment) -> Result<Self> {
        let controller = environment.create_controller()?;
        Ok(Self::with_controller(controller))
    }

    pub fn with_controller(controller: Arc<RemoteController>) -> Self {
        let id = Uuid::new_v4();
        info!("Evaluation {} runs on controller {}", id, controller.id());
        Self { id, controller }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn controller(&self) -> &Arc<RemoteController> {
        &self.controller
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            controller: Arc::clone(&self.controller),
        }
    }

    fn correlation(&self) -> CorrelationIds {
        CorrelationIds::for_evaluation(self.id)
            .with_controller(self.controller.id())
            .with_child_pid(self.controller.child_pid())
    }

    /// Evaluate components in order. After a component is stopped or hits an
    /// internal error the remaining ones are not attempted.
    pub fn evaluate_all(&self, components: &[EvaluationComponent]) -> Vec<EvaluationReport> {
        audit::evaluation_start(self.correlation(), components.len());
        let mut reports = Vec::with_capacity(components.len());
        let mut status = EvaluationStatus::Completed;
        for component in components {
            let report = self.evaluate(component);
            status = status.worst(report.status.clone());
            let halt = matches!(
                report.status,
                EvaluationStatus::Stopped | EvaluationStatus::InternalError
            );
            reports.push(report);
            if halt {
                debug!("Evaluation {} halted at component {}", self.id, component.id);
                break;
            }
        }
        audit::evaluation_end(self.correlation(), status.code());
        reports
    }

    pub fn evaluate(&self, component: &EvaluationComponent) -> EvaluationReport {
        let output = CollectedOutput::new();
        let outcome = self.run_component(component, &output);
        let (status, results, errors) = match outcome {
            Ok(results) => (EvaluationStatus::Completed, results, Vec::new()),
            Err(e) => {
                self.audit_failure(component, &e);
                let (status, errors) = classify(&e, &component.id);
                (status, Vec::new(), errors)
            }
        };
        EvaluationReport {
            component_id: component.id.clone(),
            status,
            results,
            errors,
            stdout: output.stdout(),
            stderr: output.stderr(),
        }
    }

    fn run_component(
        &self,
        component: &EvaluationComponent,
        output: &CollectedOutput,
    ) -> Result<Vec<String>> {
        if component.redefine {
            self.controller.redefine(&component.units)?;
        } else {
            self.controller.load(&component.units)?;
        }
        let mut results = Vec::new();
        if let Some(entry) = &component.entry_point {
            results.push(
                self.controller
                    .invoke(&entry.class_name, &entry.method, output)?,
            );
        }
        Ok(results)
    }

    fn audit_failure(&self, component: &EvaluationComponent, error: &SandboxError) {
        match error {
            SandboxError::InstallRejected(rejected) => {
                let correlation = self.correlation().with_component(component.id.clone());
                for violation in &rejected.violations {
                    audit::sandbox_violation(correlation.clone(), violation);
                }
            }
            SandboxError::Preempted(cause) => {
                info!("Component {} preempted: {}", component.id, cause)
            }
            SandboxError::UserException(_) => {}
            other => warn!("Component {} failed: {}", component.id, other),
        }
    }

    pub fn stop(&self) {
        stop_and_close(&self.controller, StopCause::Requested);
    }

    pub fn close(&self) {
        self.controller.close();
    }
}

impl Drop for Evaluation {
    fn drop(&mut self) {
        self.controller.close();
    }
}

fn stop_and_close(controller: &RemoteController, cause: StopCause) {
    if let Err(e) = controller.stop(cause) {
        warn!("Stop of controller {} failed: {}", controller.id(), e);
    }
    controller.close();
}
