//! Permission graph
//!
//! Allow/deny policy over packages, classes, fields and overloaded methods,
//! answered by closest match.

pub mod builder;
pub mod graph;
pub mod key;
pub mod node;
pub mod policy;
pub mod signature;

pub use builder::PermissionGraphBuilder;
pub use graph::PermissionGraph;
pub use key::SymbolKey;
pub use node::Decision;
pub use policy::PolicyParseError;
pub use signature::MethodSignature;
