//! Observability
//!
//! Structured audit events for sandbox decisions and child lifecycle.

pub mod audit;
