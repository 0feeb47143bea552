//! snipbox: sandboxed evaluation of untrusted JVM snippets
//!
//! Compiled snippet code is checked instruction by instruction against an
//! allow/deny policy before it may load, and runs in a child runtime that can
//! be forcibly interrupted and killed.
//!
//! # Architecture
//!
//! ## Access Policy ([`access`])
//! - [`access::key`]: Symbol keys over packages, classes and members
//! - [`access::signature`]: Method signatures with wildcard matching
//! - [`access::node`]: Path and method nodes of the permission tree
//! - [`access::graph`]: Closest-match permission lookups
//! - [`access::builder`]: Graph construction from policy rules
//! - [`access::policy`]: Policy file format and parse errors
//!
//! ## Compiled Form ([`bytecode`])
//! - [`bytecode::classfile`]: Class-file decoding (constant pool, method code)
//! - [`bytecode::descriptor`]: Type descriptors to source-level names
//! - [`bytecode::opcodes`]: Instruction stream iteration
//!
//! ## Validation ([`validation`])
//! - [`validation::analysis`]: Violation collection
//! - [`validation::rule`]: Rule trait over call sites and field accesses
//! - [`validation::member_filter`]: Policy-backed member rule
//! - [`validation::check`]: Instruction-stream validator
//!
//! ## Code Store ([`store`])
//! Batch-atomic gate in front of the child runtime.
//!
//! ## Forked Execution ([`core`])
//! - [`core::launcher`]: Child runtime launch and debugger attach
//! - [`core::channel`]: Length-prefixed JSON control channel
//! - [`core::controller`]: Remote controller lifecycle, stop and release
//! - [`core::environment`]: Controller factory with timeout guard
//!
//! ## Interrupt ([`interrupt`])
//! - [`interrupt::jdwp`]: Debug wire protocol client
//!
//! ## Execution Control ([`exec`])
//! - [`exec::scheduler`]: Shared one-shot task scheduler
//! - [`exec::watchdog`]: Execution timeout guard
//! - [`exec::evaluation`]: Evaluation driver
//!
//! ## Outcome ([`verdict`])
//! Status and diagnostic classification.
//!
//! ## Kernel, Observability, Configuration
//! - [`kernel::signal`]: Shutdown signals and process-group termination
//! - [`observability::audit`]: Structured security events
//! - [`config::config`]: Configuration loading
//! - [`config::validator`]: Startup validation
//! - [`config::types`]: Shared error type and statuses

// Access Policy
pub mod access;

// Compiled form
pub mod bytecode;

// Validation
pub mod validation;

// Code store
pub mod store;

// Forked execution
pub mod core;

// Interrupt
pub mod interrupt;

// Execution Control
pub mod exec;

// Outcome classification
pub mod verdict;

// Kernel primitives
pub mod kernel;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint wiring for the snipbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
