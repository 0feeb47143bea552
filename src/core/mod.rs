//! Forked execution core.
//!
//! Owns the child runtime: launch, control channel, request/response
//! exchanges, stop and release.

pub mod channel;
pub mod controller;
pub mod environment;
pub mod launcher;
pub mod types;
