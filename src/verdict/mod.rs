//! Outcome classification
//!
//! Derives evaluation statuses and author-facing diagnostics as pure
//! functions over the error a step ended with.

pub mod verdict;

pub use verdict::{classify, EvaluationError, VerdictClassifier};
