//! Shared utilities for invigil
//!
//! This crate provides:
//! - ID types (ExamCode, TrackRef, GroupId, StudentId, ClientId)
//! - Error taxonomy shared by every layer
//! - Time utilities (injectable clocks, wall-clock times, formatting)
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
