//! Exam coordination core for invigil
//!
//! This crate holds everything the admin side decides:
//! - Code generation for exam sessions and enrollment ids
//! - Session lifecycle (Scheduled -> Active -> Completed) and the global broadcast
//! - The single-active guard around starts
//! - Grading and result publication

mod codegen;
mod grading;
mod lifecycle;
mod records;

pub use codegen::*;
pub use grading::*;
pub use lifecycle::*;
