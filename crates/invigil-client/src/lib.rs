//! Student-side broadcast reconciliation for invigil
//!
//! Every student endpoint runs one [`BroadcastWatcher`]. It polls the global
//! broadcast, reconciles it against local time and walks the student's view
//! through `waiting -> countdown -> running`:
//! - [`Reconciler`] is the pure state machine, driven by observations and ticks
//! - [`SkewTracker`] keeps local/store clock offset out of every decision
//! - [`SharedView`] publishes the current view over a watch channel

mod reconciler;
mod skew;
mod state;
mod watcher;

pub use reconciler::*;
pub use skew::*;
pub use state::*;
pub use watcher::*;
