/// Rule framework: events produced while walking an instruction stream
use crate::bytecode::descriptor::MethodDescriptor;
use crate::validation::analysis::Analysis;

/// Method in which an access happens. `class_name` is dotted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPoint {
    pub class_name: String,
    pub method_name: String,
}

/// A statically named call (`invokevirtual`, `invokespecial`,
/// `invokestatic`, `invokeinterface`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodCall {
    pub access_point: AccessPoint,
    /// Dotted owner class
    pub owner: String,
    pub method: String,
    pub descriptor: MethodDescriptor,
}

/// A field read or write (`get`/`put` of `field`/`static`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldAccess {
    pub access_point: AccessPoint,
    pub owner: String,
    pub field: String,
}

/// A check run over every access in a compiled unit. Both hooks default to
/// doing nothing; a rule overrides only what it cares about.
pub trait Rule: Send + Sync {
    fn visit_call(&self, _analysis: &Analysis, _call: &MethodCall) {}

    fn visit_field_access(&self, _analysis: &Analysis, _access: &FieldAccess) {}
}
