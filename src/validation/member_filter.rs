/// Rule rejecting calls and field accesses the permission graph does not allow
use crate::access::graph::PermissionGraph;
use crate::access::key::SymbolKey;
use crate::access::signature::MethodSignature;
use crate::validation::analysis::{Analysis, Violation};
use crate::validation::rule::{FieldAccess, MethodCall, Rule};
use std::sync::Arc;

/// Owner prefix of classes synthesized around user snippets
pub const SNIPPET_WRAPPER_PREFIX: &str = "REPL.$JShell$";

pub struct ForbiddenMemberFilter {
    graph: Arc<PermissionGraph>,
}

impl ForbiddenMemberFilter {
    pub fn new(graph: Arc<PermissionGraph>) -> Self {
        Self { graph }
    }

    fn is_excluded(owner: &str) -> bool {
        owner.starts_with(SNIPPET_WRAPPER_PREFIX)
    }
}

/// Signature of a call site, with descriptor types rendered as Java names
pub fn signature_of_call(call: &MethodCall) -> MethodSignature {
    MethodSignature::new(
        call.owner.clone(),
        call.method.clone(),
        call.descriptor.return_type.clone(),
        call.descriptor.parameter_types.clone(),
    )
}

impl Rule for ForbiddenMemberFilter {
    fn visit_call(&self, analysis: &Analysis, call: &MethodCall) {
        if Self::is_excluded(&call.owner) {
            return;
        }
        let signature = signature_of_call(call);
        if !self.graph.is_method_permitted(&signature) {
            analysis.report(
                &call.access_point.class_name,
                Violation::ForbiddenMethod(signature),
            );
        }
    }

    fn visit_field_access(&self, analysis: &Analysis, access: &FieldAccess) {
        if Self::is_excluded(&access.owner) {
            return;
        }
        let key = SymbolKey::dot_separated(format!("{}.{}", access.owner, access.field));
        if !self.graph.is_permitted(&key) {
            analysis.report(
                &access.access_point.class_name,
                Violation::ForbiddenField {
                    owner: access.owner.clone(),
                    field: access.field.clone(),
                },
            );
        }
    }
}
