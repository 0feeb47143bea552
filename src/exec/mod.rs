//! Execution control
//!
//! Evaluation driver, the shared delayed-task scheduler and the execution
//! timeout guard built on it.

pub mod evaluation;
pub mod scheduler;
pub mod watchdog;
