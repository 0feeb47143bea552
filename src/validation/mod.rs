//! Instruction-stream validation
//!
//! Walks compiled units and checks every call and field access against the
//! permission graph. Violations are collected per pass, never thrown.

pub mod analysis;
pub mod check;
pub mod member_filter;
pub mod rule;

pub use analysis::{Analysis, FailedAnalysis, Violation};
pub use check::BytecodeCheck;
pub use member_filter::ForbiddenMemberFilter;
pub use rule::Rule;
