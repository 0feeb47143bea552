//! Compiled-unit decoding
//!
//! JVM class files, descriptors and instruction streams.

pub mod classfile;
pub mod cursor;
pub mod descriptor;
pub mod opcodes;

pub use classfile::{ClassFile, ClassFormatError};
