//! Minimal JVM class file assembler, plus an in-process loader to run what it assembles
//!
//!   * [`jvm`] builds class files: constant pool, method bodies, and serialization
//!   * [`runtime`] reads class files back, verifies and links them, and runs their methods
//!   * [`hello`] puts the two together for the classic "Hello world" class

pub mod hello;
pub mod jvm;
pub mod runtime;
