//! Deterministic, pure logic shared by the task engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod lines;
pub mod outcome;
pub mod sanitize;
pub mod stream;
pub mod types;
