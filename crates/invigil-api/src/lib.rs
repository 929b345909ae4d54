//! Record types for invigil
//!
//! This crate defines the documents exchanged through the shared store,
//! which is the only channel between the admin controller and students:
//! - Exam sessions and their schedules
//! - The global broadcast record and the active-session lease
//! - Submissions, marks and per-session metadata
//! - Key paths (the de facto wire protocol)

mod broadcast;
pub mod keys;
mod session;
mod submission;

pub use broadcast::*;
pub use session::*;
pub use submission::*;

/// Default size of the answer index space (questions 1..=N)
pub const DEFAULT_QUESTION_COUNT: u32 = 40;
