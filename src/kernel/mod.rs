//! Thin wrappers around process and signal primitives.
//!
//! All `unsafe` code is concentrated here.

pub mod signal;
