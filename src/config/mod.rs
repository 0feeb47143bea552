//! Configuration
//!
//! Config file loading, startup validation and the shared error type.

pub mod config;
pub mod types;
pub mod validator;
